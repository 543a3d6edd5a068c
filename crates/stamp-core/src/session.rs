//! # Scan Session State
//!
//! The scan session's transition table, as a plain struct with no I/O.
//!
//! The runtime (`stamp-scan`) owns one [`ScanSessionState`], feeds it events
//! one at a time, and performs whatever side effect the returned value asks
//! for: open a camera, call the submission client, release the stream.
//!
//! ## Transition Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  From          Event                       To            Method         │
//! │  ────────────  ──────────────────────────  ────────────  ─────────────  │
//! │  Idle/Failed   session start               Initializing  begin          │
//! │  Initializing  cameras listed              Initializing  cameras_enum.. │
//! │  Initializing  camera opened               Scanning      camera_opened  │
//! │  Init/Scan/Sub open/attach failed          Failed        fail           │
//! │  Scanning      decode (not suppressed)     Submitting    accept_decode  │
//! │  Scanning      decode (suppressed)         Scanning      accept_decode  │
//! │  Scanning      manual code                 Submitting    manual_entry   │
//! │  Failed*       manual code (camera-less)   Submitting    manual_entry   │
//! │  Scanning      switch (≥ 2 cameras)        Initializing  request_switch │
//! │  Submitting    success                     Success       submission_s.. │
//! │  Submitting    failure (not unauthorized)  Scanning      submission_f.. │
//! │  Submitting    unauthorized                Failed        submission_f.. │
//! │  Submitting    user cancel                 Scanning      cancel_subm..  │
//! │  any           stop                        Stopped       stop           │
//! │                                                                         │
//! │  * Failed with a camera error; a failure then returns to Failed.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use ts_rs::TS;

use crate::error::{ErrorKind, ScanError, SubmissionError, TransitionError};
use crate::selection::{next_camera_index, select_initial_camera};
use crate::types::{CameraDescriptor, DecodeEvent, ErrorRecord, ScanStatus, VisitOutcome};

// =============================================================================
// Decode Disposition
// =============================================================================

/// What the session decided to do with a decode event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeDisposition {
    /// Entered `Submitting`; the caller must submit this code.
    Submit(String),
    /// Dropped because the suppression window is still open.
    Suppressed,
    /// A submission is already in flight.
    InFlight,
    /// The session is not scanning.
    Ignored,
}

// =============================================================================
// Scan Session State
// =============================================================================

/// The controller's only mutable entity.
#[derive(Debug, Clone)]
pub struct ScanSessionState {
    status: ScanStatus,
    available_cameras: Vec<CameraDescriptor>,
    active_camera_index: Option<usize>,
    last_error: Option<ErrorRecord>,
    success_message: Option<String>,
    suppress_until: Option<Instant>,
    pending_code: Option<String>,
    camera_live: bool,
}

impl Default for ScanSessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanSessionState {
    pub fn new() -> Self {
        ScanSessionState {
            status: ScanStatus::Idle,
            available_cameras: Vec::new(),
            active_camera_index: None,
            last_error: None,
            success_message: None,
            suppress_until: None,
            pending_code: None,
            camera_live: false,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn available_cameras(&self) -> &[CameraDescriptor] {
        &self.available_cameras
    }

    pub fn active_camera_index(&self) -> Option<usize> {
        self.active_camera_index
    }

    pub fn active_camera(&self) -> Option<&CameraDescriptor> {
        self.active_camera_index
            .and_then(|i| self.available_cameras.get(i))
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.last_error.as_ref()
    }

    pub fn success_message(&self) -> Option<&str> {
        self.success_message.as_deref()
    }

    pub fn suppress_until(&self) -> Option<Instant> {
        self.suppress_until
    }

    /// The code currently being submitted, only set in `Submitting`.
    pub fn pending_code(&self) -> Option<&str> {
        self.pending_code.as_deref()
    }

    /// Whether the session currently holds an open camera stream.
    pub fn camera_live(&self) -> bool {
        self.camera_live
    }

    pub fn is_stopped(&self) -> bool {
        self.status == ScanStatus::Stopped
    }

    /// Returns true if decode events at `now` fall inside the suppression window.
    pub fn is_suppressed(&self, now: Instant) -> bool {
        self.suppress_until.is_some_and(|until| now < until)
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Session start. Valid from `Idle`, and from `Failed` as the recovery path.
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        match self.status {
            ScanStatus::Idle | ScanStatus::Failed => {
                self.last_error = None;
                self.suppress_until = None;
                self.pending_code = None;
                self.camera_live = false;
                self.set_status(ScanStatus::Initializing);
                Ok(())
            }
            other => Err(TransitionError::new(other, "start session")),
        }
    }

    /// Stores the enumerated cameras and returns the index to open first.
    ///
    /// `Ok(None)` means the list is empty; the caller should `fail` with
    /// `DeviceUnavailable`.
    pub fn cameras_enumerated(
        &mut self,
        cameras: Vec<CameraDescriptor>,
    ) -> Result<Option<usize>, TransitionError> {
        if self.status != ScanStatus::Initializing {
            return Err(TransitionError::new(self.status, "enumerate cameras"));
        }

        let selected = select_initial_camera(&cameras);
        self.available_cameras = cameras;
        Ok(selected)
    }

    /// A camera stream is open: `Initializing → Scanning`.
    pub fn camera_opened(&mut self, index: usize) -> Result<(), TransitionError> {
        if self.status != ScanStatus::Initializing {
            return Err(TransitionError::new(self.status, "open camera"));
        }
        if index >= self.available_cameras.len() {
            return Err(TransitionError::new(self.status, "open unknown camera"));
        }

        self.active_camera_index = Some(index);
        self.camera_live = true;
        self.set_status(ScanStatus::Scanning);
        Ok(())
    }

    /// Records a camera or decoder error and moves to `Failed`.
    ///
    /// The camera is considered released. `active_camera_index` keeps the last
    /// successfully acquired camera, if any.
    pub fn fail(&mut self, error: &ScanError) -> Result<(), TransitionError> {
        match self.status {
            ScanStatus::Initializing | ScanStatus::Scanning | ScanStatus::Submitting => {
                self.last_error = Some(ErrorRecord::from(error));
                self.camera_live = false;
                self.pending_code = None;
                self.set_status(ScanStatus::Failed);
                Ok(())
            }
            other => Err(TransitionError::new(other, "record failure")),
        }
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Applies suppression and the one-submission-in-flight rule to a decode event.
    ///
    /// The event's own timestamp is used as "now".
    pub fn accept_decode(&mut self, event: &DecodeEvent) -> DecodeDisposition {
        match self.status {
            ScanStatus::Scanning => {
                if self.is_suppressed(event.at) {
                    return DecodeDisposition::Suppressed;
                }
                let code = event.payload.trim().to_string();
                if code.is_empty() {
                    return DecodeDisposition::Ignored;
                }
                self.suppress_until = None;
                self.pending_code = Some(code.clone());
                self.set_status(ScanStatus::Submitting);
                DecodeDisposition::Submit(code)
            }
            ScanStatus::Submitting => DecodeDisposition::InFlight,
            _ => DecodeDisposition::Ignored,
        }
    }

    /// Manual code entry, bypassing the camera and the suppression window.
    ///
    /// Accepted while `Scanning`, and while `Failed` because of a camera
    /// problem (so the visitor can still type the code).
    pub fn manual_entry(&mut self, code: &str) -> Result<String, TransitionError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(TransitionError::new(self.status, "submit a blank code"));
        }

        let allowed = match self.status {
            ScanStatus::Scanning => true,
            ScanStatus::Failed => self.failed_without_camera(),
            _ => false,
        };
        if !allowed {
            return Err(TransitionError::new(self.status, "enter a code manually"));
        }

        self.pending_code = Some(code.to_string());
        self.set_status(ScanStatus::Submitting);
        Ok(code.to_string())
    }

    /// Starts a switch to the next camera (round-robin).
    ///
    /// Returns `Ok(None)` as a no-op when fewer than two cameras exist.
    /// A switch requested while a previous one is still settling is rejected.
    pub fn request_switch(&mut self) -> Result<Option<usize>, TransitionError> {
        if self.status != ScanStatus::Scanning {
            return Err(TransitionError::new(self.status, "switch camera"));
        }

        let next = next_camera_index(self.active_camera_index, self.available_cameras.len());
        if next.is_some() {
            self.camera_live = false;
            self.set_status(ScanStatus::Initializing);
        }
        Ok(next)
    }

    // =========================================================================
    // Submitting
    // =========================================================================

    /// `Submitting → Success`. The camera is released on entry.
    pub fn submission_succeeded(&mut self, outcome: &VisitOutcome) -> Result<(), TransitionError> {
        if self.status != ScanStatus::Submitting {
            return Err(TransitionError::new(self.status, "complete submission"));
        }

        self.pending_code = None;
        self.last_error = None;
        self.camera_live = false;
        self.set_status(ScanStatus::Success);
        self.success_message = Some(outcome.message.clone());
        Ok(())
    }

    /// Applies a submission failure and returns the resulting status.
    ///
    /// - `Unauthorized` → `Failed` (camera released).
    /// - anything else → `Scanning` with suppression armed until
    ///   `now + suppress_for`, or back to `Failed` for a camera-less session.
    pub fn submission_failed(
        &mut self,
        error: &SubmissionError,
        now: Instant,
        suppress_for: Duration,
    ) -> Result<ScanStatus, TransitionError> {
        if self.status != ScanStatus::Submitting {
            return Err(TransitionError::new(self.status, "fail submission"));
        }

        let scan_error = ScanError::Submission(error.clone());
        self.last_error = Some(ErrorRecord::from(&scan_error));
        self.pending_code = None;

        if error.is_fatal() {
            self.camera_live = false;
            self.set_status(ScanStatus::Failed);
        } else {
            self.resume_after_submission(now, suppress_for);
        }
        Ok(self.status)
    }

    /// User gave up on a pending submission. The prior error, if any, stays visible.
    pub fn cancel_submission(
        &mut self,
        now: Instant,
        suppress_for: Duration,
    ) -> Result<ScanStatus, TransitionError> {
        if self.status != ScanStatus::Submitting {
            return Err(TransitionError::new(self.status, "cancel submission"));
        }

        self.pending_code = None;
        self.resume_after_submission(now, suppress_for);
        Ok(self.status)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Any state → `Stopped`. Idempotent.
    pub fn stop(&mut self) {
        self.camera_live = false;
        self.pending_code = None;
        self.suppress_until = None;
        self.set_status(ScanStatus::Stopped);
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Read-only view for the presentation layer.
    pub fn snapshot(&self, session_id: &str, now: Instant) -> ScanSnapshot {
        let suppressed_for_ms = self
            .suppress_until
            .filter(|until| now < *until)
            .map(|until| (until - now).as_millis() as u64);

        ScanSnapshot {
            session_id: session_id.to_string(),
            status: self.status,
            cameras: self.available_cameras.clone(),
            active_camera: self.active_camera().cloned(),
            last_error: self.last_error.clone(),
            success_message: self.success_message.clone(),
            suppressed_for_ms,
            camera_live: self.camera_live,
            pending_code: self.pending_code.clone(),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Single place where `status` changes, so `success_message` can never
    /// outlive the `Success` state.
    fn set_status(&mut self, next: ScanStatus) {
        if self.status == ScanStatus::Success && next != ScanStatus::Success {
            self.success_message = None;
        }
        self.status = next;
    }

    fn resume_after_submission(&mut self, now: Instant, suppress_for: Duration) {
        if self.camera_live {
            self.suppress_until = Some(now + suppress_for);
            self.set_status(ScanStatus::Scanning);
        } else {
            self.set_status(ScanStatus::Failed);
        }
    }

    fn failed_without_camera(&self) -> bool {
        match &self.last_error {
            Some(record) => !matches!(
                record.kind,
                ErrorKind::Unauthorized | ErrorKind::MissingCredential
            ),
            None => false,
        }
    }
}

// =============================================================================
// Snapshot DTO
// =============================================================================

/// Serializable view of a scan session sent to the frontend.
///
/// ```json
/// {
///   "sessionId": "4f1c…",
///   "status": "scanning",
///   "activeCamera": { "id": "cam-1", "label": "Back Camera", "facing": "back" },
///   "lastError": null,
///   "suppressedForMs": 1200,
///   "cameraLive": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ScanSnapshot {
    pub session_id: String,
    pub status: ScanStatus,
    pub cameras: Vec<CameraDescriptor>,
    pub active_camera: Option<CameraDescriptor>,
    pub last_error: Option<ErrorRecord>,
    pub success_message: Option<String>,
    /// Remaining suppression window, if one is open.
    pub suppressed_for_ms: Option<u64>,
    pub camera_live: bool,
    pub pending_code: Option<String>,
}

// =============================================================================
// Unit Tests
// =============================================================================
