//! # Scanner Runtime Errors
//!
//! Faults of the runtime itself, as opposed to the user-visible
//! [`stamp_core::ScanError`] taxonomy a session can fail with.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Scanner Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Controller    │  │     Session             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  ShuttingDown   │  │  Scan(ScanError)        │ │
//! │  │  InvalidUrl     │  │  HttpClient     │  │  Transition(..)         │ │
//! │  │  ConfigLoad/Save│  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stamp_core::{ScanError, TransitionError};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type ScannerResult<T> = Result<T, ScannerError>;

#[derive(Debug, Error)]
pub enum ScannerError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid scanner configuration.
    #[error("Invalid scanner configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API base URL.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Controller Errors
    // =========================================================================
    /// The controller has stopped and accepts no more commands.
    #[error("Scan controller is shutting down")]
    ShuttingDown,

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// The session failed with a user-visible error.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The command is not valid in the session's current state.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<url::ParseError> for ScannerError {
    fn from(err: url::ParseError) -> Self {
        ScannerError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for ScannerError {
    fn from(err: std::io::Error) -> Self {
        ScannerError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ScannerError {
    fn from(err: toml::de::Error) -> Self {
        ScannerError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ScannerError {
    fn from(err: toml::ser::Error) -> Self {
        ScannerError::ConfigSaveFailed(err.to_string())
    }
}

impl From<reqwest::Error> for ScannerError {
    fn from(err: reqwest::Error) -> Self {
        ScannerError::HttpClient(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl ScannerError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ScannerError::InvalidConfig(_)
                | ScannerError::InvalidUrl(_)
                | ScannerError::ConfigLoadFailed(_)
                | ScannerError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the controller is gone and the caller should stop.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ScannerError::ShuttingDown)
    }

    /// The user-visible session error, if this wraps one.
    pub fn scan_error(&self) -> Option<&ScanError> {
        match self {
            ScannerError::Scan(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stamp_core::ScanStatus;

    #[test]
    fn test_error_categories() {
        assert!(ScannerError::InvalidUrl("ftp://x".into()).is_config_error());
        assert!(ScannerError::ShuttingDown.is_shutdown());
        assert!(!ScannerError::ShuttingDown.is_config_error());
    }

    #[test]
    fn test_wrapped_errors_display_transparently() {
        let err: ScannerError = ScanError::MissingCredential.into();
        assert_eq!(err.to_string(), "No credential available, sign in first");
        assert_eq!(err.scan_error(), Some(&ScanError::MissingCredential));

        let err: ScannerError = TransitionError::new(ScanStatus::Idle, "switch camera").into();
        assert!(err.to_string().contains("idle"));
    }
}
