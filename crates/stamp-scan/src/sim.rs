//! In-memory camera backend and doubles for driving a session without
//! hardware.
//!
//! [`SimCameraBackend`] keeps a count of held devices so tests can assert
//! that every exit path releases the camera. Frames pushed with
//! [`SimCameraBackend::push_text`] carry their payload as raw bytes, which
//! [`TextFrameDecoder`] reads back verbatim.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use stamp_core::{CameraDescriptor, ScanError};

use crate::camera::{frame_channel, CameraBackend, CameraStream, Frame, FrameReceiver, FrameSender};
use crate::decode::FrameDecoder;

// =============================================================================
// Simulated Backend
// =============================================================================

#[derive(Default)]
struct SimInner {
    cameras: Mutex<Vec<CameraDescriptor>>,
    enumeration_error: Mutex<Option<ScanError>>,
    open_failures: Mutex<HashMap<String, ScanError>>,
    open_delay: Mutex<Duration>,
    live: Mutex<HashMap<String, FrameSender>>,
    held: AtomicUsize,
    opens: AtomicUsize,
    sequence: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Camera backend backed by in-memory streams.
#[derive(Clone, Default)]
pub struct SimCameraBackend {
    inner: Arc<SimInner>,
}

impl SimCameraBackend {
    pub fn new(cameras: Vec<CameraDescriptor>) -> Self {
        let sim = SimCameraBackend::default();
        *lock(&sim.inner.cameras) = cameras;
        sim
    }

    pub fn set_cameras(&self, cameras: Vec<CameraDescriptor>) {
        *lock(&self.inner.cameras) = cameras;
    }

    /// Makes `list_cameras` fail with `error`.
    pub fn fail_enumeration(&self, error: ScanError) {
        *lock(&self.inner.enumeration_error) = Some(error);
    }

    /// Makes every open of `camera_id` fail with `error` until cleared.
    pub fn fail_open(&self, camera_id: &str, error: ScanError) {
        lock(&self.inner.open_failures).insert(camera_id.to_string(), error);
    }

    pub fn clear_failures(&self) {
        lock(&self.inner.open_failures).clear();
        *lock(&self.inner.enumeration_error) = None;
    }

    /// Suspends every open for `delay` before it resolves.
    pub fn set_open_delay(&self, delay: Duration) {
        *lock(&self.inner.open_delay) = delay;
    }

    /// Number of streams not yet released.
    pub fn held_count(&self) -> usize {
        self.inner.held.load(Ordering::SeqCst)
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn is_live(&self, camera_id: &str) -> bool {
        lock(&self.inner.live).contains_key(camera_id)
    }

    /// Publishes a frame whose bytes are `payload`. Returns false if the
    /// camera is not streaming.
    pub fn push_text(&self, camera_id: &str, payload: &str) -> bool {
        let bytes = payload.as_bytes().to_vec();
        let width = bytes.len() as u32;
        self.push_frame(camera_id, width, 1, bytes)
    }

    pub fn push_frame(&self, camera_id: &str, width: u32, height: u32, luma: Vec<u8>) -> bool {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let live = lock(&self.inner.live);
        match live.get(camera_id) {
            Some(tx) => tx
                .send(Some(Arc::new(Frame::new(width, height, luma, sequence))))
                .is_ok(),
            None => false,
        }
    }

    /// Ends the stream as if the device was unplugged. The stream stays held.
    pub fn end_stream(&self, camera_id: &str) {
        lock(&self.inner.live).remove(camera_id);
    }
}

#[async_trait]
impl CameraBackend for SimCameraBackend {
    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>, ScanError> {
        if let Some(err) = lock(&self.inner.enumeration_error).clone() {
            return Err(err);
        }
        Ok(lock(&self.inner.cameras).clone())
    }

    async fn open(&self, camera: &CameraDescriptor) -> Result<Box<dyn CameraStream>, ScanError> {
        let delay = *lock(&self.inner.open_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = lock(&self.inner.open_failures).get(&camera.id).cloned() {
            return Err(err);
        }

        let mut live = lock(&self.inner.live);
        if live.contains_key(&camera.id) {
            return Err(ScanError::DeviceBusy {
                camera_id: camera.id.clone(),
            });
        }

        let (tx, rx) = frame_channel();
        live.insert(camera.id.clone(), tx);
        self.inner.held.fetch_add(1, Ordering::SeqCst);
        self.inner.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SimStream {
            descriptor: camera.clone(),
            frames: rx,
            inner: self.inner.clone(),
            released: false,
        }))
    }
}

struct SimStream {
    descriptor: CameraDescriptor,
    frames: FrameReceiver,
    inner: Arc<SimInner>,
    released: bool,
}

impl CameraStream for SimStream {
    fn descriptor(&self) -> &CameraDescriptor {
        &self.descriptor
    }

    fn frames(&self) -> FrameReceiver {
        self.frames.clone()
    }

    fn stop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        lock(&self.inner.live).remove(&self.descriptor.id);
        self.inner.held.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Text Decoder
// =============================================================================

/// Decoder that treats the frame buffer as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFrameDecoder;

impl FrameDecoder for TextFrameDecoder {
    fn decode(&self, frame: &Frame) -> Vec<String> {
        match std::str::from_utf8(&frame.luma) {
            Ok(text) if !text.trim().is_empty() => vec![text.to_string()],
            _ => Vec::new(),
        }
    }
}
