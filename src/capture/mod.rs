use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::time::Duration;

mod controller;
mod loop_worker;

pub use controller::AutoCaptureController;

/// Camera seam. `take_photo` blocks (hardware acquisition), so the capture
/// loop invokes it through `spawn_blocking`. The returned file is a staging
/// path owned by the caller, which moves it into the session's image tree.
pub trait PhotoSource: Send + Sync {
    fn take_photo(&self) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub tick_interval: Duration,
    /// Minimum spacing between accepted captures.
    pub accept_interval: Duration,
    pub stable_required_ms: u64,
    pub stable_rate_threshold_deg_per_sec: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(120),
            accept_interval: Duration::from_millis(700),
            stable_required_ms: 400,
            stable_rate_threshold_deg_per_sec:
                crate::heading::DEFAULT_STABLE_RATE_THRESHOLD_DEG_PER_SEC,
        }
    }
}

/// Live capture state for observers (progress UI, the demo binary).
/// `hold_steady` is advisory, not an error: the slot in front of the camera
/// is uncaptured but the gate is not satisfied yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureFeedback {
    pub current_slot: Option<u32>,
    pub hold_steady: bool,
    pub is_capturing: bool,
    pub captured_count: u32,
    pub ring_complete: bool,
}

/// Stand-in camera that emits a minimal JPEG per shot. Used by the demo
/// binary and integration tests.
pub struct StubPhotoSource {
    staging_dir: PathBuf,
    counter: AtomicU64,
}

// Smallest well-formed JPEG marker sequence; enough for upload plumbing.
const STUB_JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
];

impl StubPhotoSource {
    pub fn new(staging_dir: PathBuf) -> Self {
        Self {
            staging_dir,
            counter: AtomicU64::new(0),
        }
    }
}

impl PhotoSource for StubPhotoSource {
    fn take_photo(&self) -> Result<PathBuf> {
        let shot = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.staging_dir.join(format!("capture-{shot}.jpg"));
        std::fs::write(&path, STUB_JPEG)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
