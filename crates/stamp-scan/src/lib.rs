//! # stamp-scan: Scan Session Runtime
//!
//! Runs a [`stamp_core::ScanSessionState`] against a camera backend, a frame
//! decoder and the visit endpoint.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Scan Session Runtime                              │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 ScanController (actor, one per screen)           │  │
//! │  │                                                                  │  │
//! │  │  Spawned as a Tokio task, driven through ScanControllerHandle    │  │
//! │  └───────┬──────────────────┬─────────────────────┬─────────────────┘  │
//! │          ▼                  ▼                     ▼                    │
//! │  ┌────────────────┐ ┌────────────────┐ ┌────────────────────────┐      │
//! │  │ Enumerator +   │ │  DecodeEngine  │ │  VisitSubmitter        │      │
//! │  │ CameraHandle   │ │                │ │                        │      │
//! │  │                │ │ Throttled QR   │ │ POST /passport/visit   │      │
//! │  │ One stream at  │ │ decoding on    │ │ Bearer credential      │      │
//! │  │ a time         │ │ blocking pool  │ │ Error classification   │      │
//! │  └────────────────┘ └────────────────┘ └────────────────────────┘      │
//! │                                                                         │
//! │  STATE EVENTS (to the presentation layer):                             │
//! │  • "scan://state" - Every session transition                           │
//! │  • "scan://error" - Surfaced failures                                  │
//! │  • "scan://credential" - Credential rejected                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`controller`] - `ScanController` actor and its handle
//! - [`camera`] - Camera backend traits, enumerator, stream ownership
//! - [`decode`] - Frame decoders and the throttled decode sequence
//! - [`submission`] - HTTP visit submission and status classification
//! - [`credential`] - Credential accessor seam
//! - [`events`] - Emitter, navigation and manual input seams
//! - [`config`] - Scanner configuration (TOML + env)
//! - [`error`] - Runtime error types
//! - [`sim`] - In-memory camera backend for tests and demos
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stamp_scan::{ControllerConfig, HttpVisitSubmitter, ScanConfig, ScanController, ScanDeps};
//!
//! let config = ScanConfig::load_or_default(None);
//! let submitter = HttpVisitSubmitter::new(&config)?;
//! let deps = ScanDeps::new(backend, Arc::new(submitter), credentials);
//!
//! let handle = ScanController::spawn(deps, ControllerConfig::from(&config));
//! handle.start().await?;
//! println!("Status: {}", handle.status());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod camera;
pub mod config;
pub mod controller;
pub mod credential;
pub mod decode;
pub mod error;
pub mod events;
pub mod sim;
pub mod submission;

// =============================================================================
// Re-exports
// =============================================================================

pub use camera::{
    ActiveStream, CameraBackend, CameraHandle, CameraStream, DeviceEnumerator, Frame,
    FrameReceiver, FrameSender,
};
pub use config::{ApiSettings, KioskSettings, ScanConfig, ScannerSettings};
pub use controller::{ControllerConfig, ScanController, ScanControllerHandle, ScanDeps};
pub use credential::{CredentialAccessor, StaticCredential};
pub use decode::{
    decode_interval, DecodeEngine, DecodeEvents, FrameDecoder, QrDecoder, MAX_DECODE_PER_SEC,
};
pub use error::{ScannerError, ScannerResult};
pub use events::{
    LeaveReason, ManualCodeInput, NavigationSignal, NoNavigation, NoOpEmitter, ScanEventEmitter,
};
pub use submission::{HttpVisitSubmitter, VisitSubmitter};
