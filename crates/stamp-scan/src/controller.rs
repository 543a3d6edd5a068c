//! # Scan Session Controller
//!
//! The actor that owns one scan session: it drives [`ScanSessionState`]
//! through camera acquisition, decoding and visit submission.
//!
//! ## Actor Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Scan Controller Actor                              │
//! │                                                                         │
//! │  ScanControllerHandle ──commands──►┌──────────────────────────────────┐ │
//! │   start / switch / manual          │          select! loop            │ │
//! │   cancel / stop / snapshot         │                                  │ │
//! │                                    │  commands      (mpsc)            │ │
//! │  spawned ops ──completions(op id)─►│  completions   (mpsc, op-tagged) │ │
//! │   enumerate, open, submit, prompt  │  decode events (DecodeEvents)    │ │
//! │                                    │  success timer (sleep_until)     │ │
//! │                                    └──────────────┬───────────────────┘ │
//! │                                                   │                     │
//! │                     ScanSessionState ◄────────────┤                     │
//! │                     CameraHandle     ◄────────────┤                     │
//! │                     watch<ScanSnapshot> + emitter ◄┘                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Suspension Points
//! Enumeration, camera opens and submissions run as spawned tasks. Each one
//! carries an operation id; a completion whose id is no longer current is
//! dropped (together with any stream it carries, which releases the device).
//! The actor therefore never blocks on I/O and `stop` is honored immediately.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use stamp_core::{
    CameraDescriptor, Credential, DecodeDisposition, DecodeEvent, ErrorRecord, ScanError,
    ScanSessionState, ScanSnapshot, ScanStatus, SubmissionError, VisitOutcome,
    MANUAL_ENTRY_PROMPT,
};

use crate::camera::{switch_failed, ActiveStream, CameraBackend, CameraHandle, DeviceEnumerator};
use crate::config::ScanConfig;
use crate::credential::CredentialAccessor;
use crate::decode::{DecodeEngine, DecodeEvents, FrameDecoder, QrDecoder};
use crate::error::{ScannerError, ScannerResult};
use crate::events::{
    LeaveReason, ManualCodeInput, NavigationSignal, NoNavigation, NoOpEmitter, ScanEventEmitter,
};
use crate::submission::VisitSubmitter;

// =============================================================================
// Dependencies & Settings
// =============================================================================

/// Collaborators injected into a session.
#[derive(Clone)]
pub struct ScanDeps {
    pub backend: Arc<dyn CameraBackend>,
    pub decoder: Arc<dyn FrameDecoder>,
    pub submitter: Arc<dyn VisitSubmitter>,
    pub credentials: Arc<dyn CredentialAccessor>,
    pub navigation: Arc<dyn NavigationSignal>,
    pub emitter: Arc<dyn ScanEventEmitter>,
    pub manual_input: Option<Arc<dyn ManualCodeInput>>,
}

impl ScanDeps {
    /// Required collaborators; the rest default to QR decoding and no-op seams.
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        submitter: Arc<dyn VisitSubmitter>,
        credentials: Arc<dyn CredentialAccessor>,
    ) -> Self {
        ScanDeps {
            backend,
            decoder: Arc::new(QrDecoder),
            submitter,
            credentials,
            navigation: Arc::new(NoNavigation),
            emitter: Arc::new(NoOpEmitter),
            manual_input: None,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn FrameDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_navigation(mut self, navigation: Arc<dyn NavigationSignal>) -> Self {
        self.navigation = navigation;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn ScanEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_manual_input(mut self, input: Arc<dyn ManualCodeInput>) -> Self {
        self.manual_input = Some(input);
        self
    }
}

/// Timing knobs of the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub suppress_window: Duration,
    pub success_delay: Duration,
    pub max_decode_per_sec: u32,
    pub command_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig::from(&ScanConfig::default())
    }
}

impl From<&ScanConfig> for ControllerConfig {
    fn from(config: &ScanConfig) -> Self {
        ControllerConfig {
            suppress_window: config.suppress_window(),
            success_delay: config.success_delay(),
            max_decode_per_sec: config.scanner.max_decode_per_sec,
            command_buffer: config.scanner.command_buffer.max(1),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

enum Command {
    Start {
        reply: oneshot::Sender<ScannerResult<()>>,
    },
    SwitchCamera {
        reply: oneshot::Sender<ScannerResult<Option<CameraDescriptor>>>,
    },
    ManualEntry {
        code: String,
        reply: oneshot::Sender<ScannerResult<()>>,
    },
    PromptManualEntry {
        reply: oneshot::Sender<ScannerResult<()>>,
    },
    CancelSubmission {
        reply: oneshot::Sender<ScannerResult<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

enum Completion {
    Enumerated {
        op: u64,
        result: Result<Vec<CameraDescriptor>, ScanError>,
    },
    Opened {
        op: u64,
        index: usize,
        switching: bool,
        result: Result<ActiveStream, ScanError>,
    },
    Submitted {
        op: u64,
        code: String,
        result: Result<VisitOutcome, SubmissionError>,
    },
    Prompted {
        code: Option<String>,
    },
}

struct PendingOp {
    id: u64,
    task: JoinHandle<()>,
}

impl PendingOp {
    fn abort(self) {
        self.task.abort();
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

// =============================================================================
// Controller Handle
// =============================================================================

/// Cloneable handle to a running session. Dropping every handle stops it.
#[derive(Clone)]
pub struct ScanControllerHandle {
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<ScanSnapshot>,
    session_id: Arc<str>,
}

impl ScanControllerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> ScannerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| ScannerError::ShuttingDown)?;
        rx.await.map_err(|_| ScannerError::ShuttingDown)
    }

    /// Begins (or restarts after a failure) the session.
    ///
    /// Returns once the session is `Initializing`; camera acquisition
    /// continues in the background.
    pub async fn start(&self) -> ScannerResult<()> {
        self.request(|reply| Command::Start { reply }).await?
    }

    /// Switches to the next camera. `Ok(None)` when there is only one.
    pub async fn switch_camera(&self) -> ScannerResult<Option<CameraDescriptor>> {
        self.request(|reply| Command::SwitchCamera { reply }).await?
    }

    /// Submits a typed code, bypassing the camera.
    pub async fn manual_entry(&self, code: impl Into<String>) -> ScannerResult<()> {
        let code = code.into();
        self.request(|reply| Command::ManualEntry { code, reply }).await?
    }

    /// Opens the manual code prompt. The typed code, if any, is submitted
    /// when the prompt returns.
    pub async fn prompt_manual_entry(&self) -> ScannerResult<()> {
        self.request(|reply| Command::PromptManualEntry { reply }).await?
    }

    /// Abandons the pending submission; its result will be ignored.
    pub async fn cancel_submission(&self) -> ScannerResult<()> {
        self.request(|reply| Command::CancelSubmission { reply }).await?
    }

    /// Stops the session and waits for teardown. Idempotent.
    pub async fn stop(&self) -> ScannerResult<()> {
        match self.request(|reply| Command::Stop { reply }).await {
            Ok(()) | Err(ScannerError::ShuttingDown) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> ScanSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn status(&self) -> ScanStatus {
        self.snapshot_rx.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Waits until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ScanSnapshot) -> bool,
    ) -> ScannerResult<ScanSnapshot> {
        let mut rx = self.snapshot_rx.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| ScannerError::ShuttingDown)?;
        Ok(snapshot.clone())
    }

    pub async fn wait_for_status(&self, status: ScanStatus) -> ScannerResult<ScanSnapshot> {
        self.wait_for(|s| s.status == status).await
    }
}

// =============================================================================
// Controller Actor
// =============================================================================

pub struct ScanController {
    session_id: String,
    config: ControllerConfig,
    deps: ScanDeps,
    state: ScanSessionState,
    enumerator: DeviceEnumerator,
    camera: CameraHandle,
    engine: DecodeEngine,
    decoder: Option<DecodeEvents>,
    credential: Option<Credential>,
    cmd_rx: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    snapshot_tx: watch::Sender<ScanSnapshot>,
    next_op: u64,
    camera_op: Option<PendingOp>,
    submit_op: Option<PendingOp>,
    prompt_task: Option<JoinHandle<()>>,
    success_deadline: Option<Instant>,
}

impl ScanController {
    /// Spawns a new session actor in the `Idle` state.
    pub fn spawn(deps: ScanDeps, config: ControllerConfig) -> ScanControllerHandle {
        let session_id = Uuid::new_v4().to_string();
        let state = ScanSessionState::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot(&session_id, now()));

        let controller = ScanController {
            session_id: session_id.clone(),
            enumerator: DeviceEnumerator::new(deps.backend.clone()),
            camera: CameraHandle::new(deps.backend.clone()),
            engine: DecodeEngine::new(deps.decoder.clone(), config.max_decode_per_sec),
            config,
            deps,
            state,
            decoder: None,
            credential: None,
            cmd_rx,
            completions_tx,
            completions_rx,
            snapshot_tx,
            next_op: 0,
            camera_op: None,
            submit_op: None,
            prompt_task: None,
            success_deadline: None,
        };

        let span = info_span!("scan_session", session_id = %session_id);
        tokio::spawn(controller.run().instrument(span));

        ScanControllerHandle {
            cmd_tx,
            snapshot_rx,
            session_id: Arc::from(session_id),
        }
    }

    async fn run(mut self) {
        info!("Scan controller started");

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => {
                        debug!("All controller handles dropped");
                        self.teardown();
                        break;
                    }
                },

                Some(done) = self.completions_rx.recv() => self.handle_completion(done),

                event = next_decode(&mut self.decoder) => self.handle_decode(event),

                _ = success_timer(self.success_deadline) => self.success_elapsed(),
            }
        }

        info!("Scan controller stopped");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Returns `true` once the session has stopped.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Start { reply } => {
                let _ = reply.send(self.start());
            }
            Command::SwitchCamera { reply } => {
                let _ = reply.send(self.switch_camera());
            }
            Command::ManualEntry { code, reply } => {
                let _ = reply.send(self.manual_entry(&code));
            }
            Command::PromptManualEntry { reply } => {
                let _ = reply.send(self.prompt_manual_entry());
            }
            Command::CancelSubmission { reply } => {
                let _ = reply.send(self.cancel_submission());
            }
            Command::Stop { reply } => {
                self.teardown();
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    fn start(&mut self) -> ScannerResult<()> {
        let status = self.state.status();
        if !matches!(status, ScanStatus::Idle | ScanStatus::Failed) {
            return Err(stamp_core::TransitionError::new(status, "start session").into());
        }

        let Some(credential) = self.deps.credentials.get() else {
            warn!("No credential available, session not started");
            let err = ScanError::MissingCredential;
            self.deps.emitter.emit_error(&ErrorRecord::from(&err));
            self.deps
                .navigation
                .leave_scan_screen(LeaveReason::MissingCredential);
            return Err(err.into());
        };

        self.state.begin()?;
        self.credential = Some(credential);
        self.success_deadline = None;
        self.decoder = None;
        self.camera.close();

        info!(restart = status == ScanStatus::Failed, "Scan session starting");
        self.spawn_enumeration();
        self.publish();
        Ok(())
    }

    fn switch_camera(&mut self) -> ScannerResult<Option<CameraDescriptor>> {
        match self.state.request_switch() {
            Ok(Some(index)) => {
                let target = self.state.available_cameras().get(index).cloned();
                info!(
                    camera_id = target.as_ref().map(|c| c.id.as_str()).unwrap_or_default(),
                    "Switching camera"
                );
                self.begin_camera_open(index, true);
                self.publish();
                Ok(target)
            }
            Ok(None) => {
                debug!("Single camera, switch ignored");
                Ok(None)
            }
            Err(e) => {
                if e.from == ScanStatus::Initializing {
                    warn!("Camera switch requested while another is settling, rejected");
                }
                Err(e.into())
            }
        }
    }

    fn manual_entry(&mut self, code: &str) -> ScannerResult<()> {
        let code = self.state.manual_entry(code)?;
        info!(code = %code, "Manual code entered");
        self.spawn_submit(code);
        self.publish();
        Ok(())
    }

    fn prompt_manual_entry(&mut self) -> ScannerResult<()> {
        let Some(input) = self.deps.manual_input.clone() else {
            return Err(ScannerError::InvalidConfig(
                "no manual code input configured".into(),
            ));
        };

        if self.prompt_task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Manual prompt already open");
            return Ok(());
        }

        let tx = self.completions_tx.clone();
        self.prompt_task = Some(tokio::task::spawn_blocking(move || {
            let code = input.prompt(MANUAL_ENTRY_PROMPT);
            let _ = tx.send(Completion::Prompted { code });
        }));
        Ok(())
    }

    fn cancel_submission(&mut self) -> ScannerResult<()> {
        let status = self
            .state
            .cancel_submission(now(), self.config.suppress_window)?;

        if let Some(op) = self.submit_op.take() {
            op.abort();
        }
        info!(status = %status, "Pending submission cancelled");

        if status == ScanStatus::Scanning {
            self.reattach_decoder();
        }
        self.publish();
        Ok(())
    }

    // =========================================================================
    // Completions
    // =========================================================================

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Enumerated { op, result } => {
                if !self.take_camera_op(op) {
                    return;
                }
                self.on_enumerated(result);
            }
            Completion::Opened {
                op,
                index,
                switching,
                result,
            } => {
                if !self.take_camera_op(op) {
                    // `result` is dropped here, releasing any stream.
                    return;
                }
                self.on_opened(index, switching, result);
            }
            Completion::Submitted { op, code, result } => {
                match &self.submit_op {
                    Some(pending) if pending.id == op => self.submit_op = None,
                    _ => {
                        debug!(op, code = %code, "Discarding stale submission result");
                        return;
                    }
                }
                self.on_submitted(code, result);
            }
            Completion::Prompted { code } => {
                self.prompt_task = None;
                match code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()) {
                    Some(code) => {
                        if let Err(e) = self.manual_entry(&code) {
                            warn!(error = %e, "Manual code not accepted");
                        }
                    }
                    None => debug!("Manual prompt dismissed"),
                }
            }
        }
    }

    fn on_enumerated(&mut self, result: Result<Vec<CameraDescriptor>, ScanError>) {
        let cameras = match result {
            Ok(cameras) => cameras,
            Err(e) => return self.fail(e),
        };

        match self.state.cameras_enumerated(cameras) {
            Ok(Some(index)) => self.begin_camera_open(index, false),
            Ok(None) => self.fail(ScanError::DeviceUnavailable("no cameras found".into())),
            Err(e) => debug!(error = %e, "Enumeration result ignored"),
        }
    }

    fn on_opened(&mut self, index: usize, switching: bool, result: Result<ActiveStream, ScanError>) {
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                let err = match self.state.available_cameras().get(index) {
                    Some(camera) if switching => switch_failed(camera, &e),
                    _ => e,
                };
                return self.fail(err);
            }
        };

        let camera_id = stream.descriptor().id.clone();
        let frames = self.camera.install(stream);
        if let Err(e) = self.state.camera_opened(index) {
            warn!(error = %e, "Camera opened in unexpected state");
            self.camera.close();
            return;
        }

        match self.engine.attach(frames) {
            Ok(events) => {
                info!(camera_id = %camera_id, "Scanning");
                self.decoder = Some(events);
                self.publish();
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_submitted(&mut self, code: String, result: Result<VisitOutcome, SubmissionError>) {
        match result {
            Ok(outcome) => {
                if let Err(e) = self.state.submission_succeeded(&outcome) {
                    warn!(error = %e, "Submission result in unexpected state");
                    return;
                }
                info!(code = %code, place = ?outcome.place, "Visit confirmed");
                self.decoder = None;
                self.camera.close();
                self.success_deadline = Some(Instant::now() + self.config.success_delay);
                self.publish();
            }
            Err(err) => {
                let status =
                    match self
                        .state
                        .submission_failed(&err, now(), self.config.suppress_window)
                    {
                        Ok(status) => status,
                        Err(e) => {
                            warn!(error = %e, "Submission failure in unexpected state");
                            return;
                        }
                    };

                if let Some(record) = self.state.last_error() {
                    self.deps.emitter.emit_error(record);
                }

                if err.is_fatal() {
                    error!(code = %code, error = %err, "Credential rejected, session ends");
                    self.decoder = None;
                    self.camera.close();
                    self.credential = None;
                    self.deps.credentials.invalidate();
                    self.deps.emitter.credential_invalidated();
                    self.publish();
                    self.deps
                        .navigation
                        .leave_scan_screen(LeaveReason::Unauthorized);
                    return;
                }

                warn!(code = %code, error = %err, status = %status, "Visit not registered");
                if status == ScanStatus::Scanning {
                    self.reattach_decoder();
                }
                self.publish();
            }
        }
    }

    // =========================================================================
    // Decode Events & Timers
    // =========================================================================

    fn handle_decode(&mut self, event: Option<DecodeEvent>) {
        let Some(event) = event else {
            self.decoder = None;
            if self.state.status().owns_camera() {
                warn!("Camera stream ended");
                if let Some(op) = self.submit_op.take() {
                    op.abort();
                }
                self.fail(ScanError::DecodeUnavailable("camera stream ended".into()));
            }
            return;
        };

        match self.state.accept_decode(&event) {
            DecodeDisposition::Submit(code) => {
                info!(code = %code, "Code decoded");
                self.spawn_submit(code);
                self.publish();
            }
            DecodeDisposition::Suppressed => trace!(payload = %event.payload, "Decode suppressed"),
            DecodeDisposition::InFlight => trace!(payload = %event.payload, "Submission in flight"),
            DecodeDisposition::Ignored => trace!(payload = %event.payload, "Decode ignored"),
        }
    }

    fn success_elapsed(&mut self) {
        self.success_deadline = None;
        if self.state.status() == ScanStatus::Success {
            debug!("Success display elapsed");
            self.deps.navigation.leave_scan_screen(LeaveReason::Visited);
        }
    }

    // =========================================================================
    // Spawned Operations
    // =========================================================================

    fn allocate_op(&mut self) -> u64 {
        self.next_op += 1;
        self.next_op
    }

    /// Clears the pending camera op if `op` is current.
    fn take_camera_op(&mut self, op: u64) -> bool {
        match &self.camera_op {
            Some(pending) if pending.id == op => {
                self.camera_op = None;
                true
            }
            _ => {
                debug!(op, "Discarding stale camera result");
                false
            }
        }
    }

    fn spawn_enumeration(&mut self) {
        if let Some(old) = self.camera_op.take() {
            old.abort();
        }
        let op = self.allocate_op();
        let enumerator = self.enumerator.clone();
        let tx = self.completions_tx.clone();

        let task = tokio::spawn(async move {
            let result = enumerator.list_cameras().await;
            let _ = tx.send(Completion::Enumerated { op, result });
        });
        self.camera_op = Some(PendingOp { id: op, task });
    }

    fn begin_camera_open(&mut self, index: usize, switching: bool) {
        let Some(camera) = self.state.available_cameras().get(index).cloned() else {
            return self.fail(ScanError::DeviceUnavailable(format!(
                "camera index {} out of range",
                index
            )));
        };

        if let Some(old) = self.camera_op.take() {
            old.abort();
        }
        self.decoder = None;

        let op = self.allocate_op();
        let open = self.camera.begin_open(camera);
        let tx = self.completions_tx.clone();

        let task = tokio::spawn(async move {
            let result = open.await;
            let _ = tx.send(Completion::Opened {
                op,
                index,
                switching,
                result,
            });
        });
        self.camera_op = Some(PendingOp { id: op, task });
    }

    fn spawn_submit(&mut self, code: String) {
        if let Some(old) = self.submit_op.take() {
            old.abort();
        }
        let op = self.allocate_op();
        let tx = self.completions_tx.clone();
        let submitter = self.deps.submitter.clone();
        let credential = self.credential.clone();

        let task = tokio::spawn(async move {
            let result = match credential {
                Some(credential) => submitter.submit(&code, &credential).await,
                None => Err(SubmissionError::Unauthorized {
                    message: "No credential available".into(),
                }),
            };
            let _ = tx.send(Completion::Submitted { op, code, result });
        });
        self.submit_op = Some(PendingOp { id: op, task });
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn reattach_decoder(&mut self) {
        self.decoder = None;
        let Some(frames) = self.camera.frames() else {
            return;
        };
        match self.engine.attach(frames) {
            Ok(events) => self.decoder = Some(events),
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, err: ScanError) {
        if err.is_camera_error() {
            error!(error = %err, "Camera unavailable");
        } else {
            warn!(error = %err, "Scan session failed");
        }

        if let Some(op) = self.camera_op.take() {
            op.abort();
        }
        self.decoder = None;
        self.camera.close();

        match self.state.fail(&err) {
            Ok(()) => {
                if let Some(record) = self.state.last_error() {
                    self.deps.emitter.emit_error(record);
                }
                self.publish();
            }
            Err(e) => debug!(error = %e, "Failure ignored"),
        }
    }

    fn teardown(&mut self) {
        if self.state.is_stopped() {
            return;
        }
        for op in [self.camera_op.take(), self.submit_op.take()].into_iter().flatten() {
            op.abort();
        }
        if let Some(task) = self.prompt_task.take() {
            task.abort();
        }
        self.decoder = None;
        self.camera.close();
        self.success_deadline = None;
        self.credential = None;
        self.state.stop();
        self.publish();
        info!("Scan session torn down");
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot(&self.session_id, now());
        self.deps.emitter.emit_state(&snapshot);
        self.snapshot_tx.send_replace(snapshot);
    }
}

async fn next_decode(decoder: &mut Option<DecodeEvents>) -> Option<DecodeEvent> {
    match decoder {
        Some(events) => events.next().await,
        None => pending().await,
    }
}

async fn success_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::StaticCredential;
    use crate::sim::{SimCameraBackend, TextFrameDecoder};
    use async_trait::async_trait;
    use stamp_core::{ErrorKind, Facing, DEFAULT_SUCCESS_MESSAGE};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // -------------------------------------------------------------------------
    // Doubles
    // -------------------------------------------------------------------------

    #[derive(Default)]
    struct ScriptedSubmitter {
        calls: Mutex<Vec<String>>,
        responses: Mutex<VecDeque<Result<VisitOutcome, SubmissionError>>>,
        delay: Mutex<Duration>,
    }

    impl ScriptedSubmitter {
        fn respond(&self, result: Result<VisitOutcome, SubmissionError>) {
            self.responses.lock().unwrap().push_back(result);
        }

        fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = delay;
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VisitSubmitter for ScriptedSubmitter {
        async fn submit(
            &self,
            code: &str,
            _credential: &Credential,
        ) -> Result<VisitOutcome, SubmissionError> {
            self.calls.lock().unwrap().push(code.to_string());
            let delay = *self.delay.lock().unwrap();
            let response = self.responses.lock().unwrap().pop_front();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response.unwrap_or_else(|| Ok(VisitOutcome::new(None, None)))
        }
    }

    #[derive(Default)]
    struct RecordingNavigation(Mutex<Vec<LeaveReason>>);

    impl RecordingNavigation {
        fn reasons(&self) -> Vec<LeaveReason> {
            self.0.lock().unwrap().clone()
        }
    }

    impl NavigationSignal for RecordingNavigation {
        fn leave_scan_screen(&self, reason: LeaveReason) {
            self.0.lock().unwrap().push(reason);
        }
    }

    #[derive(Default)]
    struct RecordingEmitter {
        statuses: Mutex<Vec<ScanStatus>>,
        errors: Mutex<Vec<ErrorKind>>,
        invalidations: AtomicUsize,
    }

    impl ScanEventEmitter for RecordingEmitter {
        fn emit_state(&self, snapshot: &ScanSnapshot) {
            self.statuses.lock().unwrap().push(snapshot.status);
        }

        fn emit_error(&self, error: &ErrorRecord) {
            self.errors.lock().unwrap().push(error.kind);
        }

        fn credential_invalidated(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FixedInput(Option<String>);

    impl ManualCodeInput for FixedInput {
        fn prompt(&self, label: &str) -> Option<String> {
            assert_eq!(label, MANUAL_ENTRY_PROMPT);
            self.0.clone()
        }
    }

    // -------------------------------------------------------------------------
    // Harness
    // -------------------------------------------------------------------------

    struct Harness {
        sim: SimCameraBackend,
        submitter: Arc<ScriptedSubmitter>,
        navigation: Arc<RecordingNavigation>,
        emitter: Arc<RecordingEmitter>,
        credential: StaticCredential,
        handle: ScanControllerHandle,
    }

    fn front_and_back() -> Vec<CameraDescriptor> {
        vec![
            CameraDescriptor::new("front", "Front Camera", Facing::Front),
            CameraDescriptor::new("back", "Back Camera", Facing::Back),
        ]
    }

    fn harness_with(
        cameras: Vec<CameraDescriptor>,
        credential: StaticCredential,
        manual: Option<Arc<dyn ManualCodeInput>>,
    ) -> Harness {
        let sim = SimCameraBackend::new(cameras);
        let submitter = Arc::new(ScriptedSubmitter::default());
        let navigation = Arc::new(RecordingNavigation::default());
        let emitter = Arc::new(RecordingEmitter::default());

        let mut deps = ScanDeps::new(
            Arc::new(sim.clone()),
            submitter.clone(),
            Arc::new(credential.clone()),
        )
        .with_decoder(Arc::new(TextFrameDecoder))
        .with_navigation(navigation.clone())
        .with_emitter(emitter.clone());
        if let Some(input) = manual {
            deps = deps.with_manual_input(input);
        }

        let handle = ScanController::spawn(deps, ControllerConfig::default());
        Harness {
            sim,
            submitter,
            navigation,
            emitter,
            credential,
            handle,
        }
    }

    fn harness(cameras: Vec<CameraDescriptor>) -> Harness {
        harness_with(cameras, StaticCredential::new("token"), None)
    }

    async fn scanning(h: &Harness) -> ScanSnapshot {
        h.handle.start().await.unwrap();
        h.handle.wait_for_status(ScanStatus::Scanning).await.unwrap()
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    // -------------------------------------------------------------------------
    // Scenarios
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_single_front_camera_reaches_scanning() {
        let h = harness(vec![CameraDescriptor::new("0", "Front Camera", Facing::Unknown)]);
        let snapshot = scanning(&h).await;

        assert_eq!(snapshot.active_camera.unwrap().label, "Front Camera");
        assert!(snapshot.camera_live);
        assert_eq!(h.sim.held_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decoded_code_is_registered() {
        let h = harness(front_and_back());
        let snapshot = scanning(&h).await;
        assert_eq!(snapshot.active_camera.unwrap().id, "back");

        assert!(h.sim.push_text("back", "PLACE-42"));
        let snapshot = h.handle.wait_for_status(ScanStatus::Success).await.unwrap();

        assert_eq!(snapshot.success_message.as_deref(), Some(DEFAULT_SUCCESS_MESSAGE));
        assert!(!snapshot.camera_live);
        assert_eq!(h.submitter.calls(), vec!["PLACE-42".to_string()]);
        assert_eq!(h.sim.held_count(), 0);

        let statuses = h.emitter.statuses.lock().unwrap().clone();
        assert_eq!(
            statuses
                .iter()
                .filter(|s| **s == ScanStatus::Submitting)
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_navigates_after_delay() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.sim.push_text("back", "PLACE-42");
        h.handle.wait_for_status(ScanStatus::Success).await.unwrap();

        settle(1400).await;
        assert!(h.navigation.reasons().is_empty());

        settle(200).await;
        assert_eq!(h.navigation.reasons(), vec![LeaveReason::Visited]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_success_cancels_navigation() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.sim.push_text("back", "PLACE-42");
        h.handle.wait_for_status(ScanStatus::Success).await.unwrap();

        h.handle.stop().await.unwrap();
        settle(5000).await;
        assert!(h.navigation.reasons().is_empty());
        assert!(h.handle.snapshot().success_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_code_keeps_camera_attached() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.submitter.respond(Err(SubmissionError::InvalidCode {
            message: "Lugar no encontrado".into(),
        }));

        h.sim.push_text("back", "BADCODE");
        let snapshot = h
            .handle
            .wait_for(|s| s.status == ScanStatus::Scanning && s.last_error.is_some())
            .await
            .unwrap();

        let error = snapshot.last_error.unwrap();
        assert_eq!(error.kind, ErrorKind::InvalidCode);
        assert_eq!(error.message, "Error registrando lugar: Lugar no encontrado");
        assert!(snapshot.camera_live);
        assert!(h.sim.is_live("back"));
        assert_eq!(h.sim.held_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_ends_session() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.submitter.respond(Err(SubmissionError::Unauthorized {
            message: "jwt expired".into(),
        }));

        h.sim.push_text("back", "PLACE-42");
        let snapshot = h.handle.wait_for_status(ScanStatus::Failed).await.unwrap();

        assert_eq!(snapshot.last_error.unwrap().kind, ErrorKind::Unauthorized);
        assert_eq!(h.emitter.invalidations.load(Ordering::SeqCst), 1);
        assert_eq!(h.navigation.reasons(), vec![LeaveReason::Unauthorized]);
        assert!(!h.credential.is_present());
        assert_eq!(h.sim.held_count(), 0);
        assert!(h.handle.manual_entry("PLACE-42").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_suppressed_after_transient_failure() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.submitter.respond(Err(SubmissionError::Transient {
            message: "Service Unavailable".into(),
        }));

        h.sim.push_text("back", "PLACE-1");
        h.handle
            .wait_for(|s| s.status == ScanStatus::Scanning && s.last_error.is_some())
            .await
            .unwrap();
        assert_eq!(h.submitter.calls().len(), 1);

        // Inside the 2000ms window
        h.sim.push_text("back", "PLACE-1");
        settle(300).await;
        h.sim.push_text("back", "PLACE-1");
        settle(300).await;
        assert_eq!(h.submitter.calls().len(), 1);
        assert_eq!(h.handle.status(), ScanStatus::Scanning);

        settle(2000).await;
        h.sim.push_text("back", "PLACE-1");
        h.handle.wait_for_status(ScanStatus::Success).await.unwrap();
        assert_eq!(h.submitter.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_failure_resumes_scanning_with_suppression() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.submitter.respond(Err(SubmissionError::Unknown {
            message: "I'm a teapot".into(),
        }));

        h.sim.push_text("back", "PLACE-5");
        let snapshot = h
            .handle
            .wait_for(|s| s.status == ScanStatus::Scanning && s.last_error.is_some())
            .await
            .unwrap();
        assert_eq!(snapshot.last_error.unwrap().kind, ErrorKind::Unknown);
        assert!(snapshot.suppressed_for_ms.is_some());
        assert!(snapshot.camera_live);
        assert_eq!(h.emitter.invalidations.load(Ordering::SeqCst), 0);
        assert!(h.credential.is_present());

        h.sim.push_text("back", "PLACE-5");
        settle(300).await;
        assert_eq!(h.submitter.calls().len(), 1);
        assert_eq!(h.handle.status(), ScanStatus::Scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_submission_in_flight() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.submitter.set_delay(Duration::from_secs(1));

        h.sim.push_text("back", "PLACE-42");
        h.handle.wait_for_status(ScanStatus::Submitting).await.unwrap();
        for i in 0..5 {
            h.sim.push_text("back", &format!("PLACE-{i}"));
            settle(150).await;
        }
        assert!(h.handle.manual_entry("PLACE-99").await.is_err());

        h.handle.wait_for_status(ScanStatus::Success).await.unwrap();
        assert_eq!(h.submitter.calls(), vec!["PLACE-42".to_string()]);
    }

    // -------------------------------------------------------------------------
    // Camera switching
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_switch_round_robin() {
        let h = harness(front_and_back());
        scanning(&h).await;

        let target = h.handle.switch_camera().await.unwrap().unwrap();
        assert_eq!(target.id, "front");

        let snapshot = h
            .handle
            .wait_for(|s| {
                s.status == ScanStatus::Scanning
                    && s.active_camera.as_ref().is_some_and(|c| c.id == "front")
            })
            .await
            .unwrap();
        assert!(snapshot.camera_live);
        assert_eq!(h.sim.held_count(), 1);
        assert!(h.sim.is_live("front"));
        assert!(!h.sim.is_live("back"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_with_one_camera_is_noop() {
        let h = harness(vec![CameraDescriptor::new("0", "Front Camera", Facing::Unknown)]);
        scanning(&h).await;

        assert_eq!(h.handle.switch_camera().await.unwrap(), None);
        assert_eq!(h.handle.status(), ScanStatus::Scanning);
        assert_eq!(h.sim.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_while_settling_is_rejected() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.sim.set_open_delay(Duration::from_millis(500));

        h.handle.switch_camera().await.unwrap();
        assert!(matches!(
            h.handle.switch_camera().await,
            Err(ScannerError::Transition(_))
        ));

        h.handle.wait_for_status(ScanStatus::Scanning).await.unwrap();
        assert_eq!(h.sim.held_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_switch_then_restart() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.sim.fail_open("front", ScanError::PermissionDenied { camera_id: "front".into() });

        h.handle.switch_camera().await.unwrap();
        let snapshot = h.handle.wait_for_status(ScanStatus::Failed).await.unwrap();
        assert_eq!(snapshot.last_error.unwrap().kind, ErrorKind::CameraSwitchFailed);
        assert_eq!(h.sim.held_count(), 0);

        h.sim.clear_failures();
        h.handle.start().await.unwrap();
        let snapshot = h.handle.wait_for_status(ScanStatus::Scanning).await.unwrap();
        assert!(snapshot.last_error.is_none());
        assert_eq!(snapshot.active_camera.unwrap().id, "back");
    }

    // -------------------------------------------------------------------------
    // Acquisition failures & manual entry
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_allows_manual_entry() {
        let h = harness(front_and_back());
        h.sim.fail_open("back", ScanError::PermissionDenied { camera_id: "back".into() });

        h.handle.start().await.unwrap();
        let snapshot = h.handle.wait_for_status(ScanStatus::Failed).await.unwrap();
        let error = snapshot.last_error.unwrap();
        assert_eq!(error.kind, ErrorKind::PermissionDenied);
        assert_eq!(error.message, stamp_core::CAMERA_ACCESS_MESSAGE);
        assert!(h.emitter.errors.lock().unwrap().contains(&ErrorKind::PermissionDenied));

        h.handle.manual_entry("PLACE-7").await.unwrap();
        h.handle.wait_for_status(ScanStatus::Success).await.unwrap();
        assert_eq!(h.submitter.calls(), vec!["PLACE-7".to_string()]);
        assert_eq!(h.sim.held_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_enumeration_allows_manual_entry() {
        let h = harness(front_and_back());
        h.sim
            .fail_enumeration(ScanError::DeviceUnavailable("enumeration refused".into()));

        h.handle.start().await.unwrap();
        let snapshot = h.handle.wait_for_status(ScanStatus::Failed).await.unwrap();
        let error = snapshot.last_error.unwrap();
        assert_eq!(error.kind, ErrorKind::DeviceUnavailable);
        assert_eq!(error.message, stamp_core::CAMERA_ACCESS_MESSAGE);
        assert!(snapshot.active_camera.is_none());
        assert_eq!(h.sim.open_count(), 0);

        h.handle.manual_entry("PLACE-8").await.unwrap();
        h.handle.wait_for_status(ScanStatus::Success).await.unwrap();
        assert_eq!(h.submitter.calls(), vec!["PLACE-8".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_less_retryable_failure_returns_to_failed() {
        let h = harness(front_and_back());
        h.sim.fail_open("back", ScanError::DeviceBusy { camera_id: "back".into() });
        h.handle.start().await.unwrap();
        h.handle.wait_for_status(ScanStatus::Failed).await.unwrap();

        h.submitter.respond(Err(SubmissionError::Transient {
            message: "Service Unavailable".into(),
        }));
        h.handle.manual_entry("PLACE-3").await.unwrap();
        let snapshot = h
            .handle
            .wait_for(|s| {
                s.status == ScanStatus::Failed
                    && s.last_error.as_ref().is_some_and(|e| e.kind == ErrorKind::Transient)
            })
            .await
            .unwrap();
        assert!(!snapshot.camera_live);
        assert_eq!(h.sim.held_count(), 0);
        assert!(h.navigation.reasons().is_empty());

        // Still camera-less, the visitor can retry by hand
        h.handle.manual_entry("PLACE-3").await.unwrap();
        h.handle.wait_for_status(ScanStatus::Success).await.unwrap();
        assert_eq!(h.submitter.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cameras_fails_with_device_unavailable() {
        let h = harness(Vec::new());
        h.handle.start().await.unwrap();

        let snapshot = h.handle.wait_for_status(ScanStatus::Failed).await.unwrap();
        assert_eq!(snapshot.last_error.unwrap().kind, ErrorKind::DeviceUnavailable);
        assert!(snapshot.active_camera.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credential_blocks_start() {
        let h = harness_with(front_and_back(), StaticCredential::empty(), None);

        let err = h.handle.start().await.unwrap_err();
        assert_eq!(err.scan_error(), Some(&ScanError::MissingCredential));
        assert_eq!(h.handle.status(), ScanStatus::Idle);
        assert_eq!(h.navigation.reasons(), vec![LeaveReason::MissingCredential]);
        assert_eq!(h.sim.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompted_code_is_submitted() {
        let input: Arc<dyn ManualCodeInput> = Arc::new(FixedInput(Some(" PLACE-9 ".into())));
        let h = harness_with(front_and_back(), StaticCredential::new("token"), Some(input));
        scanning(&h).await;

        h.handle.prompt_manual_entry().await.unwrap();
        h.handle.wait_for_status(ScanStatus::Success).await.unwrap();
        assert_eq!(h.submitter.calls(), vec!["PLACE-9".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissed_prompt_is_ignored() {
        let input: Arc<dyn ManualCodeInput> = Arc::new(FixedInput(Some("   ".into())));
        let h = harness_with(front_and_back(), StaticCredential::new("token"), Some(input));
        scanning(&h).await;

        h.handle.prompt_manual_entry().await.unwrap();
        settle(500).await;
        assert_eq!(h.handle.status(), ScanStatus::Scanning);
        assert!(h.submitter.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_fails_session() {
        let h = harness(front_and_back());
        scanning(&h).await;

        h.sim.end_stream("back");
        let snapshot = h.handle.wait_for_status(ScanStatus::Failed).await.unwrap();
        assert_eq!(snapshot.last_error.unwrap().kind, ErrorKind::DecodeUnavailable);
        assert_eq!(h.sim.held_count(), 0);
    }

    // -------------------------------------------------------------------------
    // Cancellation & teardown
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_submission_result_is_discarded() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.submitter.set_delay(Duration::from_secs(1));

        h.sim.push_text("back", "PLACE-42");
        h.handle.wait_for_status(ScanStatus::Submitting).await.unwrap();
        h.handle.cancel_submission().await.unwrap();

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.status, ScanStatus::Scanning);
        assert!(snapshot.suppressed_for_ms.is_some());

        settle(3000).await;
        assert_eq!(h.handle.status(), ScanStatus::Scanning);
        assert!(h.navigation.reasons().is_empty());
        assert_eq!(h.sim.held_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_open_releases_everything() {
        let h = harness(front_and_back());
        h.sim.set_open_delay(Duration::from_secs(5));

        h.handle.start().await.unwrap();
        settle(100).await;
        h.handle.stop().await.unwrap();
        assert_eq!(h.handle.status(), ScanStatus::Stopped);

        settle(10_000).await;
        assert_eq!(h.sim.held_count(), 0);
        assert_eq!(h.sim.open_count(), 0);
        assert!(h.handle.start().await.is_err());
        h.handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_submit_discards_result() {
        let h = harness(front_and_back());
        scanning(&h).await;
        h.submitter.set_delay(Duration::from_secs(5));

        h.sim.push_text("back", "PLACE-42");
        h.handle.wait_for_status(ScanStatus::Submitting).await.unwrap();
        h.handle.stop().await.unwrap();

        assert_eq!(h.sim.held_count(), 0);
        settle(10_000).await;
        assert_eq!(h.handle.status(), ScanStatus::Stopped);
        assert!(h.navigation.reasons().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_stops_session() {
        let h = harness(front_and_back());
        scanning(&h).await;
        let Harness { sim, handle, .. } = h;
        let mut updates = handle.subscribe();
        drop(handle);

        let snapshot = updates
            .wait_for(|s| s.status == ScanStatus::Stopped)
            .await
            .map(|s| s.clone());
        assert!(snapshot.is_ok());
        assert_eq!(sim.held_count(), 0);
    }
}
