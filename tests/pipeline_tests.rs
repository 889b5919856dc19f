use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use ringscan::api::{
    ApiError, CreateScanPayload, CreateScanResponse, FileKind, JobOutputs, JobResponse, JobStatus,
    ScanBackend, SubmitScanResponse, SubmitStatus, UploadImageResponse,
};
use ringscan::models::{ScanSession, ScanStatus, SlotImage};
use ringscan::pipeline::{OrchestratorConfig, PipelineError, RunOutcome, UploadOrchestrator};
use ringscan::Database;

#[derive(Default)]
struct BackendState {
    create_calls: u32,
    submit_calls: u32,
    upload_attempts: HashMap<u32, u32>,
    uploaded_order: Vec<u32>,
    /// Transient failures to inject before a slot's upload succeeds.
    transient_failures: HashMap<u32, u32>,
    /// Slot that always gets an HTTP rejection.
    reject_slot: Option<u32>,
    /// Scripted job responses, consumed front to back.
    job_script: Vec<JobResponse>,
}

#[derive(Default)]
struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    fn with_job_script(script: Vec<JobResponse>) -> Self {
        Self {
            state: Mutex::new(BackendState {
                job_script: script,
                ..BackendState::default()
            }),
        }
    }
}

fn ready_job(outputs: Option<JobOutputs>) -> JobResponse {
    JobResponse {
        status: JobStatus::Ready,
        progress: 1.0,
        message: None,
        outputs,
    }
}

fn processing_job(progress: f64) -> JobResponse {
    JobResponse {
        status: JobStatus::Processing,
        progress,
        message: Some("meshing".into()),
        outputs: None,
    }
}

impl ScanBackend for MockBackend {
    async fn create_scan(&self, _payload: CreateScanPayload) -> Result<CreateScanResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        Ok(CreateScanResponse {
            scan_id: "remote-1".into(),
        })
    }

    async fn upload_image(
        &self,
        _remote_scan_id: &str,
        image: &SlotImage,
    ) -> Result<UploadImageResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        *state.upload_attempts.entry(image.slot).or_insert(0) += 1;

        if state.reject_slot == Some(image.slot) {
            return Err(ApiError::Rejected {
                context: "Failed to upload image".into(),
                status: 422,
                detail: "bad image".into(),
            });
        }
        if let Some(remaining) = state.transient_failures.get_mut(&image.slot) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::Network {
                    context: "Failed to upload image".into(),
                    detail: "timeout".into(),
                });
            }
        }

        state.uploaded_order.push(image.slot);
        Ok(UploadImageResponse { ok: true })
    }

    async fn submit_scan(&self, _remote_scan_id: &str) -> Result<SubmitScanResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;
        Ok(SubmitScanResponse {
            job_id: "job-1".into(),
            status: SubmitStatus::Queued,
        })
    }

    async fn get_job(&self, _job_id: &str) -> Result<JobResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        if state.job_script.is_empty() {
            return Ok(ready_job(None));
        }
        Ok(state.job_script.remove(0))
    }

    fn file_url(&self, remote_scan_id: &str, kind: FileKind) -> String {
        format!("http://mock/api/files/{remote_scan_id}/{}", kind.as_str())
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        upload_retries: 2,
        retry_backoff_unit: Duration::from_millis(1),
        poll_interval: Duration::from_millis(5),
    }
}

async fn seeded_session(db: &Database, image_slots: &[u32]) -> ScanSession {
    let session = ScanSession::with_defaults();
    db.insert_session(&session).await.unwrap();
    for &slot in image_slots {
        let image = SlotImage {
            slot,
            path: format!("/tmp/{}/{slot}.jpg", session.id),
            heading: f64::from(slot) * 15.0,
            captured_at: Utc::now(),
        };
        db.upsert_slot_image(&session.id, &image).await.unwrap();
    }
    db.get_session(&session.id).await.unwrap().unwrap()
}

fn open_db(dir: &tempfile::TempDir) -> Database {
    Database::new(dir.path().join("scans.db")).unwrap()
}

#[tokio::test]
async fn full_pipeline_uploads_in_slot_order_and_finishes_ready() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[3, 0, 4, 1, 2]).await;

    let backend = MockBackend::with_job_script(vec![
        processing_job(0.42),
        ready_job(Some(JobOutputs {
            glb_url: Some("g".into()),
            usdz_url: Some("u".into()),
        })),
    ]);
    let orchestrator = UploadOrchestrator::new(db.clone(), backend, fast_config());

    let outcome = orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap();
    let finished = match outcome {
        RunOutcome::Completed(session) => session,
        RunOutcome::AlreadyRunning => panic!("run should not be concurrent"),
    };

    assert_eq!(finished.status, ScanStatus::Ready);
    assert_eq!(finished.progress, Some(100));
    assert_eq!(finished.upload_completed, Some(5));
    assert_eq!(finished.upload_total, Some(5));
    assert_eq!(finished.remote_scan_id.as_deref(), Some("remote-1"));
    assert_eq!(finished.job_id.as_deref(), Some("job-1"));

    let outputs = finished.outputs.unwrap();
    assert_eq!(
        outputs.glb_url.as_deref(),
        Some("http://mock/api/files/remote-1/glb")
    );
    assert_eq!(
        outputs.usdz_url.as_deref(),
        Some("http://mock/api/files/remote-1/usdz")
    );

    let state = orchestrator.backend().state.lock().unwrap();
    assert_eq!(state.create_calls, 1);
    assert_eq!(state.submit_calls, 1);
    assert_eq!(state.uploaded_order, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn ready_without_usdz_output_omits_the_usdz_url() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[0]).await;

    let backend = MockBackend::with_job_script(vec![ready_job(None)]);
    let orchestrator = UploadOrchestrator::new(db.clone(), backend, fast_config());
    orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap();

    let finished = db.get_session(&session.id).await.unwrap().unwrap();
    let outputs = finished.outputs.unwrap();
    assert!(outputs.glb_url.is_some());
    assert!(outputs.usdz_url.is_none());
}

#[tokio::test]
async fn transient_upload_failure_is_retried_and_counters_stay_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[0, 1, 2, 3, 4]).await;

    let backend = MockBackend::default();
    // Image 3 of 5 (slot 2) times out once, then succeeds.
    backend
        .state
        .lock()
        .unwrap()
        .transient_failures
        .insert(2, 1);
    let orchestrator = UploadOrchestrator::new(db.clone(), backend, fast_config());

    orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap();

    let finished = db.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(finished.upload_completed, Some(5));
    assert_eq!(finished.status, ScanStatus::Ready);

    let state = orchestrator.backend().state.lock().unwrap();
    assert_eq!(state.upload_attempts[&2], 2);
    for slot in [0u32, 1, 3, 4] {
        assert_eq!(state.upload_attempts[&slot], 1);
    }
    assert_eq!(state.uploaded_order, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn exhausted_retries_fail_the_run_with_the_last_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[0, 1]).await;

    let backend = MockBackend::default();
    backend
        .state
        .lock()
        .unwrap()
        .transient_failures
        .insert(1, 10);
    let orchestrator = UploadOrchestrator::new(db.clone(), backend, fast_config());

    let err = orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Api(ApiError::Network { .. })));

    // 1 initial attempt + 2 retries.
    let attempts = orchestrator.backend().state.lock().unwrap().upload_attempts[&1];
    assert_eq!(attempts, 3);

    let errored = db.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(errored.status, ScanStatus::Error);
    assert!(errored.message.is_some());
}

#[tokio::test]
async fn remote_rejection_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[0, 1, 2]).await;

    let backend = MockBackend::default();
    backend.state.lock().unwrap().reject_slot = Some(1);
    let orchestrator = UploadOrchestrator::new(db.clone(), backend, fast_config());

    let err = orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Api(ApiError::Rejected { status: 422, .. })
    ));

    let state = orchestrator.backend().state.lock().unwrap();
    assert_eq!(state.upload_attempts[&1], 1);
    // Slot 2 was never reached.
    assert!(!state.upload_attempts.contains_key(&2));
    drop(state);

    let errored = db.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(errored.status, ScanStatus::Error);
    assert!(errored.message.unwrap().contains("422"));
}

#[tokio::test]
async fn processing_session_with_job_id_resumes_straight_to_polling() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[0, 1]).await;
    db.set_remote_scan_id(&session.id, "remote-1").await.unwrap();
    db.begin_processing(&session.id, "job-1").await.unwrap();

    let backend = MockBackend::with_job_script(vec![processing_job(0.42), ready_job(None)]);
    let orchestrator = UploadOrchestrator::new(db.clone(), backend, fast_config());
    orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap();

    let state = orchestrator.backend().state.lock().unwrap();
    assert_eq!(state.create_calls, 0);
    assert_eq!(state.submit_calls, 0);
    assert!(state.upload_attempts.is_empty());
    drop(state);

    let finished = db.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(finished.status, ScanStatus::Ready);
}

#[tokio::test]
async fn job_error_marks_session_and_fails_with_normalized_progress_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[0]).await;

    let backend = MockBackend::with_job_script(vec![
        processing_job(0.42),
        JobResponse {
            status: JobStatus::Error,
            progress: 0.42,
            message: Some("reconstruction diverged".into()),
            outputs: None,
        },
    ]);
    let orchestrator = UploadOrchestrator::new(db.clone(), backend, fast_config());

    let err = orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ProcessingFailed(_)));
    assert_eq!(err.to_string(), "reconstruction diverged");

    let errored = db.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(errored.status, ScanStatus::Error);
    assert_eq!(errored.message.as_deref(), Some("reconstruction diverged"));
    // The fractional 0.42 from the intermediate poll was displayed as 42.
    assert_eq!(errored.progress, Some(42));
}

#[tokio::test]
async fn zero_images_is_rejected_before_any_network_call() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[]).await;

    let orchestrator = UploadOrchestrator::new(db.clone(), MockBackend::default(), fast_config());
    let err = orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoImages));
    assert_eq!(orchestrator.backend().state.lock().unwrap().create_calls, 0);

    // Precondition failures leave the session untouched.
    let untouched = db.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, ScanStatus::Draft);
}

#[tokio::test]
async fn unknown_session_is_reported_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let orchestrator = UploadOrchestrator::new(db, MockBackend::default(), fast_config());
    let err = orchestrator
        .run("missing", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::SessionNotFound(_)));
}

#[tokio::test]
async fn run_guard_releases_so_sequential_runs_work() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[0]).await;

    let backend = MockBackend::default();
    // First run errors out during upload.
    backend
        .state
        .lock()
        .unwrap()
        .transient_failures
        .insert(0, 10);
    let orchestrator = UploadOrchestrator::new(db.clone(), backend, fast_config());

    orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap_err();

    // The retry path: guard was released, a fresh run succeeds.
    orchestrator
        .backend()
        .state
        .lock()
        .unwrap()
        .transient_failures
        .clear();
    let outcome = orchestrator
        .run(&session.id, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
}

#[tokio::test]
async fn cancellation_leaves_session_processing_for_a_later_resume() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let session = seeded_session(&db, &[0]).await;

    // An endless stream of processing responses.
    let backend = MockBackend::with_job_script(vec![processing_job(0.1); 1000]);
    let orchestrator = UploadOrchestrator::new(db.clone(), backend, fast_config());

    let cancel_token = CancellationToken::new();
    let canceller = cancel_token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let err = orchestrator.run(&session.id, &cancel_token).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));

    let parked = db.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(parked.status, ScanStatus::Processing);
    assert_eq!(parked.job_id.as_deref(), Some("job-1"));
}
