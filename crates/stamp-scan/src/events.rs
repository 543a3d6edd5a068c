//! # Presentation Seams
//!
//! Traits the controller uses to talk outward: state/error events for the
//! UI, the navigation signal, and the manual code prompt.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Outbound Signals                                │
//! │                                                                         │
//! │  ScanEventEmitter                                                      │
//! │    "scan://state"        every transition      ScanSnapshot            │
//! │    "scan://error"        every surfaced error  ErrorRecord             │
//! │    "scan://credential"   backend rejected the token                    │
//! │                                                                         │
//! │  NavigationSignal                                                      │
//! │    LeaveScanScreen(Visited)            after the success delay         │
//! │    LeaveScanScreen(Unauthorized)       credential rejected             │
//! │    LeaveScanScreen(MissingCredential)  no credential at start          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use stamp_core::{ErrorRecord, ScanSnapshot};

// =============================================================================
// Event Emitter
// =============================================================================

/// Receives every state change of a session.
pub trait ScanEventEmitter: Send + Sync {
    fn emit_state(&self, snapshot: &ScanSnapshot);

    fn emit_error(&self, error: &ErrorRecord);

    /// The backend rejected the credential; it has been discarded.
    fn credential_invalidated(&self);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl ScanEventEmitter for NoOpEmitter {
    fn emit_state(&self, _snapshot: &ScanSnapshot) {}
    fn emit_error(&self, _error: &ErrorRecord) {}
    fn credential_invalidated(&self) {}
}

// =============================================================================
// Navigation
// =============================================================================

/// Why the scan screen is being left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Visited,
    Unauthorized,
    MissingCredential,
}

impl std::fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaveReason::Visited => write!(f, "visited"),
            LeaveReason::Unauthorized => write!(f, "unauthorized"),
            LeaveReason::MissingCredential => write!(f, "missing_credential"),
        }
    }
}

/// Asks the host to leave the scan screen.
pub trait NavigationSignal: Send + Sync {
    fn leave_scan_screen(&self, reason: LeaveReason);
}

/// Navigation that goes nowhere.
pub struct NoNavigation;

impl NavigationSignal for NoNavigation {
    fn leave_scan_screen(&self, _reason: LeaveReason) {}
}

// =============================================================================
// Manual Code Input
// =============================================================================

/// Blocking prompt for a typed place code.
///
/// Called on the blocking pool, never on the controller task.
pub trait ManualCodeInput: Send + Sync {
    /// Returns `None` when the visitor dismissed the prompt.
    fn prompt(&self, label: &str) -> Option<String>;
}
