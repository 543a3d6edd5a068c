//! # Decode Engine
//!
//! Turns the frames of an active stream into a lazy sequence of
//! [`DecodeEvent`]s.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Decode Pipeline                                │
//! │                                                                         │
//! │  FrameReceiver ──► wait for newer frame ──► throttle tick               │
//! │   (watch)                                      │                        │
//! │                                                ▼                        │
//! │                        spawn_blocking(FrameDecoder::decode)             │
//! │                                                │                        │
//! │                                                ▼                        │
//! │                        DecodeEvents (mpsc) ──► controller               │
//! │                                                                         │
//! │  Stale frames are skipped: only the newest frame at each tick is read.  │
//! │  The sequence ends when the stream's sender goes away.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The throttle is best-effort. De-duplication happens in the session state.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, trace, warn};

use stamp_core::{DecodeEvent, ScanError};

use crate::camera::{Frame, FrameReceiver};

/// Buffered events between the decode task and its consumer.
const EVENT_BUFFER: usize = 16;

// =============================================================================
// Frame Decoder
// =============================================================================

/// Extracts code payloads from one frame. Runs on the blocking pool.
pub trait FrameDecoder: Send + Sync + 'static {
    fn decode(&self, frame: &Frame) -> Vec<String>;
}

/// QR decoder backed by `rqrr`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrDecoder;

impl FrameDecoder for QrDecoder {
    fn decode(&self, frame: &Frame) -> Vec<String> {
        if !frame.is_complete() || frame.width == 0 || frame.height == 0 {
            return Vec::new();
        }

        let width = frame.width as usize;
        let height = frame.height as usize;
        let mut image = rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| {
            frame.luma[y * width + x]
        });

        image
            .detect_grids()
            .into_iter()
            .filter_map(|grid| match grid.decode() {
                Ok((_, content)) => Some(content),
                Err(e) => {
                    trace!(error = ?e, "QR grid found but not decodable");
                    None
                }
            })
            .collect()
    }
}

// =============================================================================
// Decode Events
// =============================================================================

/// The decode sequence of one attached stream.
///
/// Dropping it stops decoding.
pub struct DecodeEvents {
    events: ReceiverStream<DecodeEvent>,
    task: JoinHandle<()>,
}

impl Stream for DecodeEvents {
    type Item = DecodeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for DecodeEvents {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Decode Engine
// =============================================================================

/// Highest accepted `max_decode_per_sec`; faster rates would need a sub-millisecond tick.
pub const MAX_DECODE_PER_SEC: u32 = 1000;

/// Minimum spacing between two decode attempts at `max_per_sec`.
///
/// The rate is clamped to `1..=MAX_DECODE_PER_SEC`, so the result is never
/// shorter than 1ms.
pub fn decode_interval(max_per_sec: u32) -> Duration {
    let rate = max_per_sec.clamp(1, MAX_DECODE_PER_SEC);
    (Duration::from_secs(1) / rate).max(Duration::from_millis(1))
}

#[derive(Clone)]
pub struct DecodeEngine {
    decoder: Arc<dyn FrameDecoder>,
    min_interval: Duration,
}

impl DecodeEngine {
    /// `max_per_sec` is clamped to `1..=MAX_DECODE_PER_SEC`.
    pub fn new(decoder: Arc<dyn FrameDecoder>, max_per_sec: u32) -> Self {
        DecodeEngine {
            decoder,
            min_interval: decode_interval(max_per_sec),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Starts decoding `frames`. Must be called again after any stream change.
    ///
    /// Only frames published after attaching are decoded. Fails with
    /// `DecodeUnavailable` if the stream has already ended.
    pub fn attach(&self, mut frames: FrameReceiver) -> Result<DecodeEvents, ScanError> {
        if frames.has_changed().is_err() {
            return Err(ScanError::DecodeUnavailable(
                "camera stream already closed".into(),
            ));
        }
        frames.borrow_and_update();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(decode_loop(
            self.decoder.clone(),
            frames,
            self.min_interval,
            tx,
        ));

        Ok(DecodeEvents {
            events: ReceiverStream::new(rx),
            task,
        })
    }
}

async fn decode_loop(
    decoder: Arc<dyn FrameDecoder>,
    mut frames: FrameReceiver,
    min_interval: Duration,
    events: mpsc::Sender<DecodeEvent>,
) {
    let mut throttle = tokio::time::interval(min_interval);
    throttle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if frames.changed().await.is_err() {
            debug!("Frame source closed, decode sequence ends");
            break;
        }

        throttle.tick().await;

        let frame = frames.borrow_and_update().clone();
        let Some(frame) = frame else {
            continue;
        };

        let decoder = decoder.clone();
        let payloads = match tokio::task::spawn_blocking(move || decoder.decode(&frame)).await {
            Ok(payloads) => payloads,
            Err(e) => {
                warn!(error = %e, "Frame decode task failed");
                continue;
            }
        };

        let at = tokio::time::Instant::now().into_std();
        for payload in payloads {
            if events.send(DecodeEvent::new(payload, at)).await.is_err() {
                return;
            }
        }
    }
}
