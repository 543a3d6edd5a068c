//! # Camera Selection
//!
//! Picks the camera a session starts on, and the next one on a switch.
//!
//! ## Initial Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Initial Camera Heuristic                            │
//! │                                                                         │
//! │  1. facing == Back                 → first such descriptor             │
//! │  2. facing unknown, label contains                                     │
//! │     environment / rear / back / trasera  (case-insensitive)           │
//! │                                    → first such descriptor             │
//! │  3. otherwise                      → descriptor 0                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Label matching only applies where the platform gave no facing metadata.
//! A camera that reports `Front` is never picked for its label.

use crate::types::{CameraDescriptor, Facing};

/// Label fragments that identify an environment-facing camera.
const REAR_LABEL_KEYWORDS: [&str; 4] = ["environment", "rear", "back", "trasera"];

/// Returns the index of the camera to start on, or `None` for an empty list.
pub fn select_initial_camera(cameras: &[CameraDescriptor]) -> Option<usize> {
    if cameras.is_empty() {
        return None;
    }

    if let Some(index) = cameras.iter().position(|c| c.facing == Facing::Back) {
        return Some(index);
    }

    let by_label = cameras.iter().position(|c| {
        c.facing == Facing::Unknown && label_suggests_rear(&c.label)
    });

    Some(by_label.unwrap_or(0))
}

/// Round-robin successor of `current` in a list of `len` cameras.
///
/// Returns `None` when switching is meaningless (fewer than two cameras).
pub fn next_camera_index(current: Option<usize>, len: usize) -> Option<usize> {
    if len < 2 {
        return None;
    }
    let current = current.unwrap_or(0).min(len - 1);
    Some((current + 1) % len)
}

fn label_suggests_rear(label: &str) -> bool {
    let label = label.to_lowercase();
    REAR_LABEL_KEYWORDS.iter().any(|k| label.contains(k))
}
