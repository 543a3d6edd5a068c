//! # Error Types
//!
//! The scanner's error taxonomy, shared by every layer.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stamp-core errors (this file)                                         │
//! │  ├── ScanError         - What the user sees a session fail with        │
//! │  │   ├── camera:       DeviceUnavailable, PermissionDenied,           │
//! │  │   │                 DeviceBusy, CameraSwitchFailed,                │
//! │  │   │                 DecodeUnavailable                               │
//! │  │   ├── Submission(SubmissionError)                                   │
//! │  │   └── MissingCredential                                            │
//! │  ├── SubmissionError   - Unauthorized, InvalidCode, Transient, Unknown │
//! │  └── TransitionError   - Event not valid in the current state          │
//! │                                                                         │
//! │  stamp-scan errors (separate crate)                                    │
//! │  └── ScannerError      - Config, channels, HTTP client setup           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation Policy
//! | Error | Session goes to | Retry |
//! |---|---|---|
//! | camera acquisition | `Failed` | user grants access, restarts |
//! | `CameraSwitchFailed` | `Failed` | caller re-issues start |
//! | `InvalidCode`, `Transient`, `Unknown` | `Scanning` | present code again |
//! | `Unauthorized` | `Failed` | never; credential is discarded |

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::types::ScanStatus;
use crate::{CAMERA_ACCESS_MESSAGE, SUBMISSION_ERROR_PREFIX};

// =============================================================================
// Error Kind
// =============================================================================

/// Machine-readable error tag sent to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ErrorKind {
    DeviceUnavailable,
    PermissionDenied,
    DeviceBusy,
    CameraSwitchFailed,
    DecodeUnavailable,
    Unauthorized,
    InvalidCode,
    Transient,
    Unknown,
    MissingCredential,
}

// =============================================================================
// Submission Error
// =============================================================================

/// Failure returned by the visit submission endpoint.
///
/// Every variant carries the human-readable message from the backend (or a
/// transport description when the backend was unreachable).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// The credential is expired or invalid.
    #[error("Credential rejected: {message}")]
    Unauthorized { message: String },

    /// The code does not correspond to a known place.
    #[error("Invalid place code: {message}")]
    InvalidCode { message: String },

    /// Server error or network unreachable; presenting the code again may work.
    #[error("Temporary submission failure: {message}")]
    Transient { message: String },

    /// Anything the status mapping doesn't recognize.
    #[error("Unexpected submission failure: {message}")]
    Unknown { message: String },
}

impl SubmissionError {
    /// The message as reported by the backend.
    pub fn message(&self) -> &str {
        match self {
            SubmissionError::Unauthorized { message }
            | SubmissionError::InvalidCode { message }
            | SubmissionError::Transient { message }
            | SubmissionError::Unknown { message } => message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmissionError::Unauthorized { .. } => ErrorKind::Unauthorized,
            SubmissionError::InvalidCode { .. } => ErrorKind::InvalidCode,
            SubmissionError::Transient { .. } => ErrorKind::Transient,
            SubmissionError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Returns true if submitting the same code again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmissionError::Transient { .. })
    }

    /// Returns true if the session must end instead of going back to scanning.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SubmissionError::Unauthorized { .. })
    }
}

// =============================================================================
// Scan Error
// =============================================================================

/// Every failure a scan session can surface to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// The platform refused to enumerate cameras, or there are none.
    #[error("No camera available: {0}")]
    DeviceUnavailable(String),

    /// The user (or policy) denied access to the camera stream.
    #[error("Permission denied for camera {camera_id}")]
    PermissionDenied { camera_id: String },

    /// Another consumer holds the device.
    #[error("Camera {camera_id} is busy")]
    DeviceBusy { camera_id: String },

    /// Opening the next camera during a switch failed.
    #[error("Switching to camera {camera_id} failed: {reason}")]
    CameraSwitchFailed { camera_id: String, reason: String },

    /// The decode engine could not attach to the stream.
    #[error("Decoder unavailable: {0}")]
    DecodeUnavailable(String),

    /// The backend rejected or failed the visit.
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// No credential available; the session is not started.
    #[error("No credential available, sign in first")]
    MissingCredential,
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            ScanError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            ScanError::DeviceBusy { .. } => ErrorKind::DeviceBusy,
            ScanError::CameraSwitchFailed { .. } => ErrorKind::CameraSwitchFailed,
            ScanError::DecodeUnavailable(_) => ErrorKind::DecodeUnavailable,
            ScanError::Submission(e) => e.kind(),
            ScanError::MissingCredential => ErrorKind::MissingCredential,
        }
    }

    /// Returns true for camera acquisition errors (`DeviceUnavailable`,
    /// `PermissionDenied`, `DeviceBusy`).
    ///
    /// These are terminal for the current attempt and never retried
    /// automatically: they need a permission grant or the other app closed.
    pub fn is_acquisition_error(&self) -> bool {
        matches!(
            self,
            ScanError::DeviceUnavailable(_)
                | ScanError::PermissionDenied { .. }
                | ScanError::DeviceBusy { .. }
        )
    }

    /// Returns true for any error that leaves the session without a camera
    /// while still allowing manual code entry.
    pub fn is_camera_error(&self) -> bool {
        self.is_acquisition_error()
            || matches!(
                self,
                ScanError::CameraSwitchFailed { .. } | ScanError::DecodeUnavailable(_)
            )
    }

    /// Display text for the presentation layer.
    pub fn user_message(&self) -> String {
        match self {
            ScanError::DeviceUnavailable(_)
            | ScanError::PermissionDenied { .. }
            | ScanError::DeviceBusy { .. } => CAMERA_ACCESS_MESSAGE.to_string(),
            ScanError::CameraSwitchFailed { .. } => {
                "No se pudo cambiar de cámara. Vuelve a iniciar el escaneo.".to_string()
            }
            ScanError::DecodeUnavailable(_) => {
                "No se pudo iniciar el lector de códigos.".to_string()
            }
            ScanError::Submission(e) => format!("{}{}", SUBMISSION_ERROR_PREFIX, e.message()),
            ScanError::MissingCredential => {
                "Inicia sesión para registrar lugares.".to_string()
            }
        }
    }
}

// =============================================================================
// Transition Error
// =============================================================================

/// An event arrived that the current state does not accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {event} while {from}")]
pub struct TransitionError {
    pub from: ScanStatus,
    pub event: &'static str,
}

impl TransitionError {
    pub fn new(from: ScanStatus, event: &'static str) -> Self {
        TransitionError { from, event }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_error_categories() {
        let unauthorized = SubmissionError::Unauthorized {
            message: "token expired".into(),
        };
        assert!(unauthorized.is_fatal());
        assert!(!unauthorized.is_retryable());

        let transient = SubmissionError::Transient {
            message: "502".into(),
        };
        assert!(transient.is_retryable());
        assert!(!transient.is_fatal());
    }

    #[test]
    fn test_user_messages() {
        let err = ScanError::PermissionDenied {
            camera_id: "cam-0".into(),
        };
        assert_eq!(err.user_message(), CAMERA_ACCESS_MESSAGE);

        let err: ScanError = SubmissionError::InvalidCode {
            message: "Lugar no encontrado".into(),
        }
        .into();
        assert_eq!(
            err.user_message(),
            "Error registrando lugar: Lugar no encontrado"
        );
        assert_eq!(err.kind(), ErrorKind::InvalidCode);
    }

    #[test]
    fn test_camera_error_classification() {
        assert!(ScanError::DeviceBusy { camera_id: "x".into() }.is_acquisition_error());
        assert!(!ScanError::DecodeUnavailable("closed".into()).is_acquisition_error());
        assert!(ScanError::DecodeUnavailable("closed".into()).is_camera_error());
        assert!(!ScanError::MissingCredential.is_camera_error());
    }

    #[test]
    fn test_transition_error_display() {
        let err = TransitionError::new(ScanStatus::Stopped, "switch camera");
        assert_eq!(err.to_string(), "cannot switch camera while stopped");
    }
}
