use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::api::{CreateScanPayload, ScanBackend};
use crate::models::{ScanSession, ScanStatus, SlotImage};
use crate::store::Database;

use super::poller::JobPoller;
use super::{upload_progress, OrchestratorConfig, PipelineError};

/// Result of invoking the orchestrator for a session.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(ScanSession),
    /// Another run is already driving this session; the call was a no-op.
    AlreadyRunning,
}

/// Drives a session through create-remote-scan, upload, submit, and poll.
/// Every stage decision comes from the persisted session, so a run can be
/// re-invoked after a crash or restart and it resumes where the record says
/// it is: an existing `remote_scan_id` skips creation, and a `processing`
/// session with a `job_id` goes straight to polling.
pub struct UploadOrchestrator<B: ScanBackend> {
    db: Database,
    backend: B,
    config: OrchestratorConfig,
    active_runs: Arc<Mutex<HashSet<String>>>,
}

struct RunGuard {
    active_runs: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        match self.active_runs.lock() {
            Ok(mut runs) => {
                runs.remove(&self.session_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.session_id);
            }
        }
    }
}

impl<B: ScanBackend> UploadOrchestrator<B> {
    pub fn new(db: Database, backend: B, config: OrchestratorConfig) -> Self {
        Self {
            db,
            backend,
            config,
            active_runs: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn run(
        &self,
        session_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let _guard = {
            let mut runs = self
                .active_runs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !runs.insert(session_id.to_string()) {
                info!("pipeline already running for session {session_id}, ignoring");
                return Ok(RunOutcome::AlreadyRunning);
            }
            RunGuard {
                active_runs: Arc::clone(&self.active_runs),
                session_id: session_id.to_string(),
            }
        };

        match self.run_stages(session_id, cancel_token).await {
            Ok(session) => Ok(RunOutcome::Completed(session)),
            Err(PipelineError::Cancelled) => {
                info!("pipeline run cancelled for session {session_id}");
                Err(PipelineError::Cancelled)
            }
            // Precondition failures happen before the run touches anything;
            // the session keeps whatever state it had.
            Err(err @ (PipelineError::NoImages | PipelineError::SessionNotFound(_))) => Err(err),
            Err(err) => {
                error!("pipeline run failed for session {session_id}: {err}");
                if let Err(mark_err) = self.db.mark_error(session_id, &err.to_string()).await {
                    error!("failed to record pipeline error for {session_id}: {mark_err:?}");
                }
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        session_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<ScanSession, PipelineError> {
        let mut current = self.load(session_id).await?;
        if current.images.is_empty() {
            return Err(PipelineError::NoImages);
        }

        if current.remote_scan_id.is_none() {
            let remote = self
                .backend
                .create_scan(CreateScanPayload {
                    device_id: current.id.clone(),
                    target_type: current.target_type.clone(),
                    scale_meters: current.scale_meters,
                    slots_total: current.slots_total,
                })
                .await?;
            info!("created remote scan {} for session {session_id}", remote.scan_id);
            self.db.set_remote_scan_id(session_id, &remote.scan_id).await?;
            current = self.load(session_id).await?;
        }

        let remote_scan_id = current
            .remote_scan_id
            .clone()
            .ok_or_else(|| PipelineError::Store(anyhow!("missing remote scan id")))?;

        let poller = JobPoller::new(&self.db, &self.backend, self.config.poll_interval);

        // Restart-recovery shortcut: a processing session with a job id needs
        // neither re-upload nor re-submit.
        if current.status == ScanStatus::Processing {
            if let Some(job_id) = current.job_id.clone() {
                info!("resuming poll of job {job_id} for session {session_id}");
                return poller
                    .poll_until_terminal(session_id, &remote_scan_id, &job_id, cancel_token)
                    .await;
            }
        }

        // Upload stage: ascending slot order, one at a time, so the completed
        // counter stays monotonic and a restarted run can simply re-walk the
        // sequence (the server overwrites by slot).
        let images = current.images.clone();
        let total = images.len() as u32;
        self.db.begin_upload(session_id, total).await?;

        for (index, image) in images.iter().enumerate() {
            if cancel_token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.upload_with_retry(&remote_scan_id, image).await?;
            let completed = index as u32 + 1;
            self.db
                .record_upload_progress(session_id, completed, upload_progress(completed, total))
                .await?;
        }

        let submitted = self.backend.submit_scan(&remote_scan_id).await?;
        self.db.begin_processing(session_id, &submitted.job_id).await?;

        poller
            .poll_until_terminal(session_id, &remote_scan_id, &submitted.job_id, cancel_token)
            .await
    }

    async fn upload_with_retry(
        &self,
        remote_scan_id: &str,
        image: &SlotImage,
    ) -> Result<(), PipelineError> {
        let mut attempt: u32 = 0;
        loop {
            match self.backend.upload_image(remote_scan_id, image).await {
                Ok(_) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.config.upload_retries => {
                    attempt += 1;
                    warn!(
                        "upload of slot {} failed (attempt {attempt}), retrying: {err}",
                        image.slot
                    );
                    tokio::time::sleep(self.config.retry_backoff_unit * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn load(&self, session_id: &str) -> Result<ScanSession, PipelineError> {
        self.db
            .get_session(session_id)
            .await?
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))
    }
}
