//! Console presentation: state lines on stdout, errors on stderr, and the
//! navigation signal that ends the kiosk run.

use chrono::Local;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use stamp_core::{ErrorRecord, ScanSnapshot, ScanStatus};
use stamp_scan::{LeaveReason, NavigationSignal, ScanEventEmitter};

/// One human-readable line for a snapshot.
pub fn render(snapshot: &ScanSnapshot) -> String {
    let mut line = format!("[{}]", snapshot.status);

    if let Some(camera) = &snapshot.active_camera {
        line.push_str(&format!(" cámara: {}", camera.label));
        if !snapshot.camera_live {
            line.push_str(" (sin imagen)");
        }
    }
    if let Some(code) = &snapshot.pending_code {
        line.push_str(&format!(" código: {}", code));
    }
    if let Some(message) = &snapshot.success_message {
        line.push_str(&format!(" ✓ {}", message));
    }
    if let Some(ms) = snapshot.suppressed_for_ms {
        line.push_str(&format!(" (pausa {} ms)", ms));
    }
    if snapshot.status == ScanStatus::Failed {
        if let Some(err) = &snapshot.last_error {
            line.push_str(&format!(" ✗ {}", err.message));
        }
    }
    line
}

// =============================================================================
// Console Emitter
// =============================================================================

/// Prints a line whenever the rendered session changes.
#[derive(Default)]
pub struct ConsoleEmitter {
    last_line: Mutex<Option<String>>,
}

impl ConsoleEmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScanEventEmitter for ConsoleEmitter {
    fn emit_state(&self, snapshot: &ScanSnapshot) {
        let line = render(snapshot);
        if let Ok(mut last) = self.last_line.lock() {
            if last.as_deref() == Some(line.as_str()) {
                return;
            }
            *last = Some(line.clone());
        }

        println!("{} {}", Local::now().format("%H:%M:%S"), line);
        debug!(status = %snapshot.status, session_id = %snapshot.session_id, "Emitted scan://state");
    }

    fn emit_error(&self, error: &ErrorRecord) {
        eprintln!("{} ✗ {}", Local::now().format("%H:%M:%S"), error.message);
        error!(kind = ?error.kind, message = %error.message, "Emitted scan://error");
    }

    fn credential_invalidated(&self) {
        eprintln!("La sesión expiró. Inicia sesión nuevamente.");
        info!("Emitted scan://credential");
    }
}

// =============================================================================
// Navigation
// =============================================================================

/// Forwards navigation requests to the kiosk run loop.
pub struct ExitSignal {
    tx: mpsc::UnboundedSender<LeaveReason>,
}

impl ExitSignal {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LeaveReason>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ExitSignal { tx }, rx)
    }
}

impl NavigationSignal for ExitSignal {
    fn leave_scan_screen(&self, reason: LeaveReason) {
        info!(reason = %reason, "Leaving scan screen");
        let _ = self.tx.send(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stamp_core::{CameraDescriptor, ErrorKind, Facing};

    fn snapshot(status: ScanStatus) -> ScanSnapshot {
        ScanSnapshot {
            session_id: "s-1".into(),
            status,
            cameras: Vec::new(),
            active_camera: Some(CameraDescriptor::new("back", "Back Camera", Facing::Back)),
            last_error: None,
            success_message: None,
            suppressed_for_ms: None,
            camera_live: true,
            pending_code: None,
        }
    }

    #[test]
    fn test_render_scanning() {
        assert_eq!(render(&snapshot(ScanStatus::Scanning)), "[scanning] cámara: Back Camera");
    }

    #[test]
    fn test_render_failure_shows_message() {
        let mut snap = snapshot(ScanStatus::Failed);
        snap.camera_live = false;
        snap.last_error = Some(ErrorRecord {
            kind: ErrorKind::PermissionDenied,
            message: "Sin acceso".into(),
        });

        let line = render(&snap);
        assert!(line.starts_with("[failed] cámara: Back Camera (sin imagen)"));
        assert!(line.ends_with("✗ Sin acceso"));
    }

    #[tokio::test]
    async fn test_exit_signal_forwards_reason() {
        let (signal, mut rx) = ExitSignal::channel();
        signal.leave_scan_screen(LeaveReason::Visited);
        assert_eq!(rx.recv().await, Some(LeaveReason::Visited));
    }
}
