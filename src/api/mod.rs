use std::future::Future;

use serde::Serialize;

mod client;
mod error;
mod types;

pub use client::{ApiClient, ApiConfig};
pub use error::ApiError;
pub use types::{
    parse_job_payload, CreateScanResponse, JobOutputs, JobResponse, JobStatus, SubmitScanResponse,
    SubmitStatus, UploadImageResponse,
};

use crate::models::SlotImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Glb,
    Usdz,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Glb => "glb",
            FileKind::Usdz => "usdz",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScanPayload {
    pub device_id: String,
    pub target_type: String,
    pub scale_meters: f64,
    pub slots_total: u32,
}

/// The remote reconstruction service, seen from the orchestrator. The
/// production implementation is [`ApiClient`]; tests script their own.
pub trait ScanBackend: Send + Sync {
    fn create_scan(
        &self,
        payload: CreateScanPayload,
    ) -> impl Future<Output = Result<CreateScanResponse, ApiError>> + Send;

    fn upload_image(
        &self,
        remote_scan_id: &str,
        image: &SlotImage,
    ) -> impl Future<Output = Result<UploadImageResponse, ApiError>> + Send;

    fn submit_scan(
        &self,
        remote_scan_id: &str,
    ) -> impl Future<Output = Result<SubmitScanResponse, ApiError>> + Send;

    fn get_job(&self, job_id: &str) -> impl Future<Output = Result<JobResponse, ApiError>> + Send;

    fn file_url(&self, remote_scan_id: &str, kind: FileKind) -> String;
}
