//! # Domain Types
//!
//! Core value types used throughout the scanner.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ CameraDescriptor │   │   DecodeEvent    │   │   VisitOutcome   │    │
//! │  │  ──────────────  │   │  ──────────────  │   │  ──────────────  │    │
//! │  │  id (opaque)     │   │  payload         │   │  message         │    │
//! │  │  label           │   │  at (Instant)    │   │  place           │    │
//! │  │  facing          │   │                  │   │  recorded_at     │    │
//! │  └──────────────────┘   └──────────────────┘   └──────────────────┘    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │     Facing       │   │   ScanStatus     │   │   Credential     │    │
//! │  │  Front           │   │  Idle → ...      │   │  bearer token    │    │
//! │  │  Back            │   │  ... → Stopped   │   │  (redacted Debug)│    │
//! │  │  Unknown         │   │                  │   │                  │    │
//! │  └──────────────────┘   └──────────────────┘   └──────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use ts_rs::TS;

use crate::error::{ErrorKind, ScanError};
use crate::DEFAULT_SUCCESS_MESSAGE;

// =============================================================================
// Camera Descriptor
// =============================================================================

/// Camera orientation metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Facing {
    /// User-facing (selfie) camera.
    Front,
    /// Environment-facing camera, preferred for scanning.
    Back,
    /// The platform did not report an orientation.
    #[default]
    Unknown,
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
            Facing::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for Facing {
    type Err = std::convert::Infallible;

    /// Accepts the browser `facingMode` vocabulary as well as our own.
    /// Anything unrecognized is `Unknown`, never an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "front" | "user" => Facing::Front,
            "back" | "rear" | "environment" => Facing::Back,
            _ => Facing::Unknown,
        })
    }
}

/// One enumerated camera device.
///
/// Immutable once enumerated; the list is refreshed only at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CameraDescriptor {
    /// Opaque platform device id.
    pub id: String,

    /// Human-readable label (may be empty before permission is granted).
    pub label: String,

    /// Reported orientation.
    pub facing: Facing,
}

impl CameraDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, facing: Facing) -> Self {
        CameraDescriptor {
            id: id.into(),
            label: label.into(),
            facing,
        }
    }
}

// =============================================================================
// Decode Event
// =============================================================================

/// A payload extracted from a single video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeEvent {
    /// Decoded text (the place code).
    pub payload: String,

    /// Monotonic time the frame was decoded.
    pub at: Instant,
}

impl DecodeEvent {
    pub fn new(payload: impl Into<String>, at: Instant) -> Self {
        DecodeEvent {
            payload: payload.into(),
            at,
        }
    }
}

// =============================================================================
// Credential
// =============================================================================

/// Opaque bearer token proving the visitor's identity to the backend.
///
/// `Debug` never prints the token so credentials can't leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Credential(token.into())
    }

    /// Returns the raw token.
    pub fn token(&self) -> &str {
        &self.0
    }

    /// Returns the `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// True when the token is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

// =============================================================================
// Visit Outcome
// =============================================================================

/// Confirmation returned by the backend for a registered visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitOutcome {
    /// Message shown in the `Success` state. Never empty.
    pub message: String,

    /// Place name or id, when the backend echoes it.
    pub place: Option<String>,

    /// When the confirmation was received.
    pub recorded_at: DateTime<Utc>,
}

impl VisitOutcome {
    /// Builds an outcome, falling back to [`DEFAULT_SUCCESS_MESSAGE`] when the
    /// backend message is missing or blank.
    pub fn new(message: Option<String>, place: Option<String>) -> Self {
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_string());

        VisitOutcome {
            message,
            place,
            recorded_at: Utc::now(),
        }
    }
}

// =============================================================================
// Error Record
// =============================================================================

/// User-visible error: machine tag plus display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ScanError> for ErrorRecord {
    fn from(err: &ScanError) -> Self {
        ErrorRecord {
            kind: err.kind(),
            message: err.user_message(),
        }
    }
}

// =============================================================================
// Scan Status
// =============================================================================

/// Lifecycle state of a scan session.
///
/// ## State Flow
/// ```text
///  Idle ──► Initializing ──► Scanning ──► Submitting ──► Success
///               │   ▲           │  ▲          │
///               │   └─ switch ──┘  └─ retry ──┘
///               ▼                             │
///             Failed ◄──── unauthorized ──────┘
///
///  any ──► Stopped (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ScanStatus {
    Idle,
    Initializing,
    Scanning,
    Submitting,
    Success,
    Failed,
    Stopped,
}

impl ScanStatus {
    /// States in which the session holds exclusive ownership of a camera.
    pub fn owns_camera(&self) -> bool {
        matches!(
            self,
            ScanStatus::Initializing | ScanStatus::Scanning | ScanStatus::Submitting
        )
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScanStatus::Idle => "idle",
            ScanStatus::Initializing => "initializing",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Submitting => "submitting",
            ScanStatus::Success => "success",
            ScanStatus::Failed => "failed",
            ScanStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_parsing() {
        assert_eq!("environment".parse::<Facing>().unwrap(), Facing::Back);
        assert_eq!("User".parse::<Facing>().unwrap(), Facing::Front);
        assert_eq!("periscope".parse::<Facing>().unwrap(), Facing::Unknown);
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::new("secret-token");
        assert_eq!(format!("{:?}", cred), "Credential(***)");
        assert_eq!(cred.bearer(), "Bearer secret-token");
    }

    #[test]
    fn test_visit_outcome_default_message() {
        let outcome = VisitOutcome::new(Some("   ".into()), None);
        assert_eq!(outcome.message, DEFAULT_SUCCESS_MESSAGE);

        let outcome = VisitOutcome::new(Some("Biblioteca registrada".into()), None);
        assert_eq!(outcome.message, "Biblioteca registrada");
    }

    #[test]
    fn test_status_camera_ownership() {
        assert!(ScanStatus::Submitting.owns_camera());
        assert!(!ScanStatus::Success.owns_camera());
        assert!(!ScanStatus::Failed.owns_camera());
    }
}
