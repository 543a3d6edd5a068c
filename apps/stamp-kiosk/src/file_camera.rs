//! # File Camera Backend
//!
//! Cameras backed by folders of still frames.
//!
//! ```text
//! cameras_dir/
//! ├── back/
//! │   ├── camera.toml      label = "Back Camera", facing = "back"
//! │   ├── 001.png
//! │   └── 002.png
//! └── front/
//!     └── 001.jpg          (no camera.toml: label = "front", facing unknown)
//! ```
//!
//! An open camera replays its frames in a loop at the configured interval.
//! Each folder can be opened by one stream at a time.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stamp_core::{CameraDescriptor, Facing, ScanError};
use stamp_scan::camera::frame_channel;
use stamp_scan::{CameraBackend, CameraStream, Frame, FrameReceiver};

const MANIFEST_FILE: &str = "camera.toml";
const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif"];

/// Optional `camera.toml` in a camera folder.
///
/// `facing` takes the browser `facingMode` words too (`environment`, `user`).
#[derive(Debug, Default, Deserialize)]
struct CameraManifest {
    label: Option<String>,
    facing: Option<String>,
}

impl CameraManifest {
    fn facing(&self) -> Facing {
        self.facing
            .as_deref()
            .and_then(|f| f.parse().ok())
            .unwrap_or_default()
    }
}

// =============================================================================
// Backend
// =============================================================================

#[derive(Clone)]
pub struct FileCameraBackend {
    root: PathBuf,
    frame_interval: Duration,
    held: Arc<Mutex<HashSet<String>>>,
}

impl FileCameraBackend {
    pub fn new(root: impl Into<PathBuf>, frame_interval: Duration) -> Self {
        FileCameraBackend {
            root: root.into(),
            frame_interval: frame_interval.max(Duration::from_millis(1)),
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether a stream currently holds `camera_id`.
    pub fn is_held(&self, camera_id: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(camera_id))
            .unwrap_or(false)
    }

    fn camera_dir(&self, camera: &CameraDescriptor) -> PathBuf {
        self.root.join(&camera.id)
    }
}

#[async_trait]
impl CameraBackend for FileCameraBackend {
    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>, ScanError> {
        let root = self.root.clone();
        let cameras = tokio::task::spawn_blocking(move || scan_cameras(&root))
            .await
            .map_err(|e| ScanError::DeviceUnavailable(e.to_string()))??;

        debug!(root = ?self.root, count = cameras.len(), "Camera folders scanned");
        Ok(cameras)
    }

    async fn open(&self, camera: &CameraDescriptor) -> Result<Box<dyn CameraStream>, ScanError> {
        if self.is_held(&camera.id) {
            return Err(ScanError::DeviceBusy {
                camera_id: camera.id.clone(),
            });
        }

        let dir = self.camera_dir(camera);
        let camera_id = camera.id.clone();
        let frames = tokio::task::spawn_blocking(move || load_frames(&dir, &camera_id))
            .await
            .map_err(|e| ScanError::DeviceUnavailable(e.to_string()))??;

        // Re-checked after loading: another open may have won meanwhile
        {
            let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
            if !held.insert(camera.id.clone()) {
                return Err(ScanError::DeviceBusy {
                    camera_id: camera.id.clone(),
                });
            }
        }

        info!(camera_id = %camera.id, frames = frames.len(), "File camera opened");
        Ok(Box::new(FileStream::start(
            camera.clone(),
            frames,
            self.frame_interval,
            self.held.clone(),
        )))
    }
}

// =============================================================================
// Stream
// =============================================================================

struct FileStream {
    descriptor: CameraDescriptor,
    frames: FrameReceiver,
    replay: JoinHandle<()>,
    held: Arc<Mutex<HashSet<String>>>,
    released: bool,
}

impl FileStream {
    fn start(
        descriptor: CameraDescriptor,
        frames: Vec<Arc<Frame>>,
        interval: Duration,
        held: Arc<Mutex<HashSet<String>>>,
    ) -> Self {
        let (tx, rx) = frame_channel();
        let replay = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for frame in frames.iter().cycle() {
                ticker.tick().await;
                if tx.send(Some(frame.clone())).is_err() {
                    break;
                }
            }
        });

        FileStream {
            descriptor,
            frames: rx,
            replay,
            held,
            released: false,
        }
    }
}

impl CameraStream for FileStream {
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
        self.replay.abort();
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.descriptor.id);
        }
        debug!(camera_id = %self.descriptor.id, "File camera released");
    }
}

// =============================================================================
// Disk Access
// =============================================================================

fn io_error(path: &Path, err: io::Error, camera_id: Option<&str>) -> ScanError {
    match (err.kind(), camera_id) {
        (io::ErrorKind::PermissionDenied, Some(id)) => ScanError::PermissionDenied {
            camera_id: id.to_string(),
        },
        _ => ScanError::DeviceUnavailable(format!("{}: {}", path.display(), err)),
    }
}

fn scan_cameras(root: &Path) -> Result<Vec<CameraDescriptor>, ScanError> {
    let entries = std::fs::read_dir(root).map_err(|e| io_error(root, e, None))?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    Ok(dirs.iter().filter_map(|dir| describe(dir)).collect())
}

fn describe(dir: &Path) -> Option<CameraDescriptor> {
    let id = dir.file_name()?.to_string_lossy().into_owned();
    let manifest = read_manifest(&dir.join(MANIFEST_FILE));
    let facing = manifest.facing();
    let label = manifest
        .label
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| id.clone());
    Some(CameraDescriptor::new(id, label, facing))
}

fn read_manifest(path: &Path) -> CameraManifest {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return CameraManifest::default();
    };
    toml::from_str(&contents).unwrap_or_else(|e| {
        warn!(?path, error = %e, "Ignoring unreadable camera manifest");
        CameraManifest::default()
    })
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn load_frames(dir: &Path, camera_id: &str) -> Result<Vec<Arc<Frame>>, ScanError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_error(dir, e, Some(camera_id)))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_frame_file(path))
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for (sequence, path) in paths.iter().enumerate() {
        match image::open(path) {
            Ok(img) => {
                let luma = img.to_luma8();
                let (width, height) = luma.dimensions();
                frames.push(Arc::new(Frame::new(
                    width,
                    height,
                    luma.into_raw(),
                    sequence as u64,
                )));
            }
            Err(e) => warn!(?path, error = %e, "Skipping unreadable frame"),
        }
    }

    if frames.is_empty() {
        return Err(ScanError::DeviceUnavailable(format!(
            "no frames in {}",
            dir.display()
        )));
    }
    Ok(frames)
}
