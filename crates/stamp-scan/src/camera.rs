//! # Camera Access
//!
//! Device enumeration and the single active camera stream of a session.
//!
//! ## Ownership Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Camera Ownership                                 │
//! │                                                                         │
//! │  CameraBackend (platform)                                              │
//! │     │  list_cameras()  ──► [CameraDescriptor]                          │
//! │     │  open(desc)      ──► Box<dyn CameraStream>                       │
//! │     ▼                                                                   │
//! │  ActiveStream  ── releases the device when dropped                     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  CameraHandle  ── holds at most one ActiveStream                       │
//! │     begin_open(desc): release current, return owned open future        │
//! │     install(stream):  store the result of that future                  │
//! │     switch_to(desc):  begin_open + install, errors → CameraSwitchFailed│
//! │     close():          idempotent                                       │
//! │                                                                         │
//! │  Frames flow through a watch channel: receivers only ever see the      │
//! │  newest frame, and the channel closing means the stream ended.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use stamp_core::{CameraDescriptor, ScanError};

// =============================================================================
// Frames
// =============================================================================

/// One greyscale video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major 8-bit luma, `width * height` bytes.
    pub luma: Vec<u8>,
    /// Increments per frame produced by the stream.
    pub sequence: u64,
}

impl Frame {
    pub fn new(width: u32, height: u32, luma: Vec<u8>, sequence: u64) -> Self {
        Frame {
            width,
            height,
            luma,
            sequence,
        }
    }

    /// True when the buffer actually holds `width * height` pixels.
    pub fn is_complete(&self) -> bool {
        self.luma.len() >= (self.width as usize) * (self.height as usize)
    }
}

/// Latest-frame receiver. `None` until the first frame arrives.
pub type FrameReceiver = watch::Receiver<Option<Arc<Frame>>>;

/// Producer side of a [`FrameReceiver`].
pub type FrameSender = watch::Sender<Option<Arc<Frame>>>;

/// Creates an empty frame channel.
pub fn frame_channel() -> (FrameSender, FrameReceiver) {
    watch::channel(None)
}

// =============================================================================
// Backend Traits
// =============================================================================

/// An open camera stream as handed out by a backend.
pub trait CameraStream: Send {
    fn descriptor(&self) -> &CameraDescriptor;

    /// A new receiver for this stream's frames.
    fn frames(&self) -> FrameReceiver;

    /// Releases the device. Must be idempotent.
    fn stop(&mut self);
}

/// Platform camera access.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Lists cameras in a stable order.
    ///
    /// Fails with `DeviceUnavailable` if the platform refuses enumeration.
    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>, ScanError>;

    /// Opens a stream exclusively.
    ///
    /// Fails with `PermissionDenied` or `DeviceBusy`.
    async fn open(&self, camera: &CameraDescriptor) -> Result<Box<dyn CameraStream>, ScanError>;
}

// =============================================================================
// Device Enumerator
// =============================================================================

/// Stateless wrapper around [`CameraBackend::list_cameras`].
#[derive(Clone)]
pub struct DeviceEnumerator {
    backend: Arc<dyn CameraBackend>,
}

impl DeviceEnumerator {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        DeviceEnumerator { backend }
    }

    pub async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>, ScanError> {
        match self.backend.list_cameras().await {
            Ok(cameras) => {
                debug!(count = cameras.len(), "Cameras enumerated");
                Ok(cameras)
            }
            Err(e) => {
                warn!(error = %e, "Camera enumeration failed");
                Err(e)
            }
        }
    }
}

// =============================================================================
// Active Stream
// =============================================================================

/// A stream that releases its device when dropped.
pub struct ActiveStream {
    inner: Box<dyn CameraStream>,
}

impl ActiveStream {
    pub fn new(inner: Box<dyn CameraStream>) -> Self {
        ActiveStream { inner }
    }

    pub fn descriptor(&self) -> &CameraDescriptor {
        self.inner.descriptor()
    }

    pub fn frames(&self) -> FrameReceiver {
        self.inner.frames()
    }

    pub fn stop(&mut self) {
        self.inner.stop();
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl std::fmt::Debug for ActiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveStream")
            .field("camera", &self.inner.descriptor().id)
            .finish()
    }
}

// =============================================================================
// Camera Handle
// =============================================================================

/// Owns the session's one active camera stream.
pub struct CameraHandle {
    backend: Arc<dyn CameraBackend>,
    active: Option<ActiveStream>,
}

impl CameraHandle {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        CameraHandle {
            backend,
            active: None,
        }
    }

    /// Releases the current stream and returns a future that opens `camera`.
    ///
    /// The future borrows nothing from the handle, so the caller may run it
    /// elsewhere and hand the result back through [`CameraHandle::install`].
    /// Dropping the future or its output releases whatever it acquired.
    pub fn begin_open(
        &mut self,
        camera: CameraDescriptor,
    ) -> BoxFuture<'static, Result<ActiveStream, ScanError>> {
        self.close();
        let backend = self.backend.clone();
        Box::pin(async move {
            debug!(camera_id = %camera.id, "Opening camera");
            backend.open(&camera).await.map(ActiveStream::new)
        })
    }

    /// Stores a freshly opened stream, releasing any previous one.
    pub fn install(&mut self, stream: ActiveStream) -> FrameReceiver {
        self.close();
        info!(camera_id = %stream.descriptor().id, "Camera stream active");
        let frames = stream.frames();
        self.active = Some(stream);
        frames
    }

    pub async fn open(&mut self, camera: &CameraDescriptor) -> Result<FrameReceiver, ScanError> {
        let stream = self.begin_open(camera.clone()).await?;
        Ok(self.install(stream))
    }

    /// Stops the current stream, then opens `camera`.
    ///
    /// On failure the previous stream stays stopped.
    pub async fn switch_to(&mut self, camera: &CameraDescriptor) -> Result<FrameReceiver, ScanError> {
        self.open(camera)
            .await
            .map_err(|e| switch_failed(camera, &e))
    }

    /// Releases the stream if one is held. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.active.take() {
            debug!(camera_id = %stream.descriptor().id, "Closing camera");
            stream.stop();
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&CameraDescriptor> {
        self.active.as_ref().map(ActiveStream::descriptor)
    }

    /// A new receiver on the active stream, if any.
    pub fn frames(&self) -> Option<FrameReceiver> {
        self.active.as_ref().map(ActiveStream::frames)
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Maps an open failure during a switch to `CameraSwitchFailed`.
pub fn switch_failed(camera: &CameraDescriptor, cause: &ScanError) -> ScanError {
    match cause {
        ScanError::CameraSwitchFailed { .. } => cause.clone(),
        other => ScanError::CameraSwitchFailed {
            camera_id: camera.id.clone(),
            reason: other.to_string(),
        },
    }
}
