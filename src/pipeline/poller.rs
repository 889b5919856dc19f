use log::info;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::{FileKind, JobStatus, ScanBackend};
use crate::models::{ScanOutputs, ScanSession};
use crate::store::Database;

use super::{normalize_job_progress, PipelineError};

const DEFAULT_PROCESSING_ERROR: &str = "3D model processing failed.";

/// Fetches job status on a fixed interval until the remote reports a
/// terminal state, persisting normalized progress along the way. The
/// cancellation token stops the loop between fetches; a cancelled session
/// stays `processing` so a later run resumes polling.
pub struct JobPoller<'a, B: ScanBackend> {
    db: &'a Database,
    backend: &'a B,
    interval: Duration,
}

impl<'a, B: ScanBackend> JobPoller<'a, B> {
    pub fn new(db: &'a Database, backend: &'a B, interval: Duration) -> Self {
        Self {
            db,
            backend,
            interval,
        }
    }

    pub async fn poll_until_terminal(
        &self,
        session_id: &str,
        remote_scan_id: &str,
        job_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<ScanSession, PipelineError> {
        loop {
            if cancel_token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let job = self.backend.get_job(job_id).await?;
            let progress = normalize_job_progress(job.progress);

            match job.status {
                JobStatus::Ready => {
                    let outputs = ScanOutputs {
                        glb_url: Some(self.backend.file_url(remote_scan_id, FileKind::Glb)),
                        usdz_url: job
                            .outputs
                            .as_ref()
                            .and_then(|o| o.usdz_url.as_ref())
                            .map(|_| self.backend.file_url(remote_scan_id, FileKind::Usdz)),
                    };
                    self.db
                        .mark_ready(session_id, &outputs, job.message.as_deref())
                        .await?;
                    info!("job {job_id} ready for session {session_id}");
                    return self
                        .db
                        .get_session(session_id)
                        .await?
                        .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()));
                }
                JobStatus::Error => {
                    let message = job
                        .message
                        .unwrap_or_else(|| DEFAULT_PROCESSING_ERROR.to_string());
                    self.db.mark_error(session_id, &message).await?;
                    return Err(PipelineError::ProcessingFailed(message));
                }
                JobStatus::Queued | JobStatus::Processing => {
                    self.db
                        .record_processing(session_id, progress, job.message.as_deref())
                        .await?;

                    tokio::select! {
                        _ = tokio::time::sleep(self.interval) => {}
                        _ = cancel_token.cancelled() => return Err(PipelineError::Cancelled),
                    }
                }
            }
        }
    }
}
