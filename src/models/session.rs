use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DEFAULT_SCALE_METERS, DEFAULT_SLOTS_TOTAL, TARGET_TYPE_DISH};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Draft,
    Uploading,
    Processing,
    Ready,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Draft => "draft",
            ScanStatus::Uploading => "uploading",
            ScanStatus::Processing => "processing",
            ScanStatus::Ready => "ready",
            ScanStatus::Error => "error",
        }
    }
}

/// One captured image in the ring. At most one per slot; re-capturing a slot
/// replaces the previous entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotImage {
    pub slot: u32,
    pub path: String,
    pub heading: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutputs {
    pub glb_url: Option<String>,
    pub usdz_url: Option<String>,
}

/// Persisted scan session. The upload pipeline derives its resume point
/// entirely from this record, never from in-memory flow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub target_type: String,
    pub scale_meters: f64,
    pub slots_total: u32,
    /// Ascending by slot index.
    pub images: Vec<SlotImage>,
    pub status: ScanStatus,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub upload_completed: Option<u32>,
    pub upload_total: Option<u32>,
    pub remote_scan_id: Option<String>,
    pub job_id: Option<String>,
    pub outputs: Option<ScanOutputs>,
    pub updated_at: DateTime<Utc>,
}

impl ScanSession {
    pub fn new(scale_meters: f64, slots_total: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            target_type: TARGET_TYPE_DISH.to_string(),
            scale_meters,
            slots_total,
            images: Vec::new(),
            status: ScanStatus::Draft,
            progress: None,
            message: None,
            upload_completed: None,
            upload_total: None,
            remote_scan_id: None,
            job_id: None,
            outputs: None,
            updated_at: now,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SCALE_METERS, DEFAULT_SLOTS_TOTAL)
    }

    pub fn has_slot(&self, slot: u32) -> bool {
        self.images.iter().any(|image| image.slot == slot)
    }

    pub fn captured_count(&self) -> usize {
        self.images.len()
    }

    pub fn is_ring_complete(&self) -> bool {
        self.captured_count() as u32 >= self.slots_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_as_empty_draft() {
        let session = ScanSession::with_defaults();
        assert_eq!(session.status, ScanStatus::Draft);
        assert_eq!(session.slots_total, DEFAULT_SLOTS_TOTAL);
        assert!(session.images.is_empty());
        assert!(!session.is_ring_complete());
        assert!(!session.has_slot(0));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ScanStatus::Uploading).unwrap();
        assert_eq!(json, "\"uploading\"");
        let parsed: ScanStatus = serde_json::from_str("\"ready\"").unwrap();
        assert_eq!(parsed, ScanStatus::Ready);
    }

    #[test]
    fn session_round_trips_camel_case() {
        let mut session = ScanSession::with_defaults();
        session.remote_scan_id = Some("remote-1".into());
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("remoteScanId").is_some());
        assert!(json.get("slotsTotal").is_some());
        let back: ScanSession = serde_json::from_value(json).unwrap();
        assert_eq!(back.remote_scan_id.as_deref(), Some("remote-1"));
    }
}
