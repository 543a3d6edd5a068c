//! # stamp-core: Pure Scan Session Logic
//!
//! This crate holds the decision-making part of the stamp scanner: which
//! camera to pick, which decode events to act on, and how the session moves
//! between states. Nothing in here touches a camera, a socket, or a clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Stamp Scanner Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Presentation (web / kiosk console)                 │   │
//! │  │        ScanSnapshot ◄── state events ── actions ──►             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              stamp-scan (controller actor, I/O)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stamp-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   error   │  │ selection │  │  session  │  │   │
//! │  │   │ Camera    │  │ ScanError │  │ rear-cam  │  │ state     │  │   │
//! │  │   │ Decode    │  │ Submission│  │ heuristic │  │ machine   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • TIME IS PASSED IN                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Camera descriptors, decode events, credentials, visit outcomes
//! - [`error`] - Error taxonomy shared by every layer
//! - [`selection`] - Initial camera choice and round-robin switching
//! - [`session`] - `ScanSessionState` and its transition table
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Instant;
//! use stamp_core::{CameraDescriptor, DecodeEvent, DecodeDisposition, Facing, ScanSessionState};
//!
//! let mut session = ScanSessionState::new();
//! session.begin().unwrap();
//!
//! let cameras = vec![
//!     CameraDescriptor::new("cam-0", "Front Camera", Facing::Unknown),
//!     CameraDescriptor::new("cam-1", "Back Camera", Facing::Unknown),
//! ];
//! let selected = session.cameras_enumerated(cameras).unwrap();
//! assert_eq!(selected, Some(1));
//!
//! session.camera_opened(1).unwrap();
//! let event = DecodeEvent::new("PLACE-42", Instant::now());
//! assert_eq!(
//!     session.accept_decode(&event),
//!     DecodeDisposition::Submit("PLACE-42".to_string())
//! );
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod selection;
pub mod session;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{ErrorKind, ScanError, SubmissionError, TransitionError};
pub use selection::{next_camera_index, select_initial_camera};
pub use session::{DecodeDisposition, ScanSessionState, ScanSnapshot};
pub use types::*;

// =============================================================================
// User-Facing Text
// =============================================================================

/// Shown when a visit is confirmed and the backend sent no message of its own.
pub const DEFAULT_SUCCESS_MESSAGE: &str = "¡Lugar registrado correctamente!";

/// Shown for every camera acquisition failure.
///
/// Permission, busy and enumeration failures all need the same user action
/// (grant access or close the other app), so they share one message.
pub const CAMERA_ACCESS_MESSAGE: &str =
    "No se pudo acceder a la cámara. Asegúrate de dar permisos.";

/// Prefix for submission failures surfaced to the user.
pub const SUBMISSION_ERROR_PREFIX: &str = "Error registrando lugar: ";

/// Label for the manual code prompt.
pub const MANUAL_ENTRY_PROMPT: &str = "Ingresa el ID del lugar:";
