use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::heading::HeadingState;
use crate::store::{Database, ImageVault};

use super::loop_worker::capture_loop;
use super::{CaptureConfig, CaptureFeedback, PhotoSource};

/// Owns the periodic auto-capture task for one session. One loop per
/// controller; starting while active is an error, and `stop` joins the task
/// so no tick runs after it returns.
pub struct AutoCaptureController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    feedback_rx: Option<watch::Receiver<CaptureFeedback>>,
}

impl AutoCaptureController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            feedback_rx: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        session_id: String,
        config: CaptureConfig,
        db: Database,
        vault: ImageVault,
        camera: Arc<dyn PhotoSource>,
        heading_rx: watch::Receiver<HeadingState>,
    ) -> Result<watch::Receiver<CaptureFeedback>> {
        if self.handle.is_some() {
            bail!("auto-capture already active");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let (feedback_tx, feedback_rx) = watch::channel(CaptureFeedback::default());

        let handle = tokio::spawn(capture_loop(
            session_id,
            config,
            db,
            vault,
            camera,
            heading_rx,
            feedback_tx,
            token_clone,
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.feedback_rx = Some(feedback_rx.clone());
        Ok(feedback_rx)
    }

    pub fn feedback(&self) -> Option<watch::Receiver<CaptureFeedback>> {
        self.feedback_rx.clone()
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        self.feedback_rx = None;

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("auto-capture loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for AutoCaptureController {
    fn default() -> Self {
        Self::new()
    }
}
