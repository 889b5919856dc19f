use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateScanResponse {
    pub scan_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadImageResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    Queued,
    Processing,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScanResponse {
    pub job_id: String,
    pub status: SubmitStatus,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Ready,
    Error,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobOutputs {
    #[serde(default)]
    pub glb_url: Option<String>,
    #[serde(default)]
    pub usdz_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub status: JobStatus,
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub outputs: Option<JobOutputs>,
}

/// Compatibility shim for pre-v1 servers, which sent `outputs` as a list
/// instead of an object. The field is dropped before validation so those
/// payloads read as "no outputs" rather than a parse failure.
fn normalize_legacy_job_payload(payload: &mut Value) {
    if let Some(record) = payload.as_object_mut() {
        if record.get("outputs").is_some_and(Value::is_array) {
            record.remove("outputs");
        }
    }
}

pub fn parse_job_payload(mut payload: Value) -> Result<JobResponse, serde_json::Error> {
    normalize_legacy_job_payload(&mut payload);
    serde_json::from_value(payload)
}
