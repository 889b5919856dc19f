use thiserror::Error;
use tokio::time::Duration;

mod orchestrator;
mod poller;

pub use orchestrator::{RunOutcome, UploadOrchestrator};
pub use poller::JobPoller;

use crate::api::ApiError;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Extra attempts per image after the first (2 retries = 3 attempts).
    pub upload_retries: u32,
    /// Backoff is `attempt * retry_backoff_unit`, linear.
    pub retry_backoff_unit: Duration,
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            upload_retries: 2,
            retry_backoff_unit: Duration::from_millis(500),
            poll_interval: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("scan session {0} not found")]
    SessionNotFound(String),

    /// Rejected before any network call.
    #[error("capture at least one image before creating a 3D model")]
    NoImages,

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The remote job itself reported failure.
    #[error("{0}")]
    ProcessingFailed(String),

    /// The supplied cancellation token fired; the session keeps its persisted
    /// stage so a later run resumes where this one left off.
    #[error("pipeline run cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// The backend reports job progress either as a fraction (0..1) or as a
/// percentage; displayable progress is always an integer percent.
pub fn normalize_job_progress(raw: f64) -> u8 {
    let percent = if raw.is_finite() {
        if raw <= 1.0 {
            raw * 100.0
        } else {
            raw
        }
    } else {
        0.0
    };
    percent.round().clamp(0.0, 100.0) as u8
}

pub fn upload_progress(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    ((f64::from(completed) / f64::from(total)) * 100.0)
        .round()
        .clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_progress_becomes_percent() {
        assert_eq!(normalize_job_progress(0.42), 42);
        assert_eq!(normalize_job_progress(0.0), 0);
        assert_eq!(normalize_job_progress(1.0), 100);
    }

    #[test]
    fn percent_progress_passes_through() {
        assert_eq!(normalize_job_progress(77.0), 77);
        assert_eq!(normalize_job_progress(99.6), 100);
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        assert_eq!(normalize_job_progress(-3.0), 0);
        assert_eq!(normalize_job_progress(140.0), 100);
        assert_eq!(normalize_job_progress(f64::NAN), 0);
    }

    #[test]
    fn upload_progress_rounds_and_guards_zero_total() {
        assert_eq!(upload_progress(0, 5), 0);
        assert_eq!(upload_progress(1, 3), 33);
        assert_eq!(upload_progress(2, 3), 67);
        assert_eq!(upload_progress(5, 5), 100);
        assert_eq!(upload_progress(0, 0), 0);
    }
}
