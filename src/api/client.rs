use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ApiError;
use super::types::{
    parse_job_payload, CreateScanResponse, JobResponse, SubmitScanResponse, UploadImageResponse,
};
use super::{CreateScanPayload, FileKind, ScanBackend};
use crate::models::SlotImage;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(8);
const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Sent as X-API-KEY when the backend has auth enabled.
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_key: None,
        }
    }
}

/// HTTP client for the remote scan/reconstruction service.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Health endpoint lives at the server root, outside the /api prefix.
    pub fn health_url(&self) -> String {
        format!("{}/up", self.base_url)
    }

    /// Probe the configured backend. Unauthenticated on purpose: the check is
    /// about reachability, not credentials. Returns the HTTP status on
    /// success.
    pub async fn test_connection(&self) -> Result<u16, ApiError> {
        let context = "Connection test failed";
        let response = self
            .http
            .get(self.health_url())
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|err| ApiError::Network {
                context: context.to_string(),
                detail: err.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(ApiError::Rejected {
                context: context.to_string(),
                status: status.as_u16(),
                detail: status.canonical_reason().unwrap_or("Unknown").to_string(),
            })
        }
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<Response, ApiError> {
        self.with_auth(request)
            .send()
            .await
            .map_err(|err| ApiError::Network {
                context: context.to_string(),
                detail: err.to_string(),
            })
    }

    async fn read_value(response: Response, context: &str) -> Result<Value, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let detail = decode_rejection_detail(response, status).await;
            return Err(ApiError::Rejected {
                context: context.to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        response.json().await.map_err(|err| ApiError::Network {
            context: context.to_string(),
            detail: err.to_string(),
        })
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        context: &str,
    ) -> Result<T, ApiError> {
        let value = Self::read_value(response, context).await?;
        serde_json::from_value(value).map_err(|err| ApiError::InvalidResponse {
            context: context.to_string(),
            detail: err.to_string(),
        })
    }
}

impl ScanBackend for ApiClient {
    async fn create_scan(
        &self,
        payload: CreateScanPayload,
    ) -> Result<CreateScanResponse, ApiError> {
        let context = "Failed to create scan";
        let request = self.http.post(self.api_url("/scans")).json(&payload);
        let response = self.send(request, context).await?;
        Self::decode(response, context).await
    }

    async fn upload_image(
        &self,
        remote_scan_id: &str,
        image: &SlotImage,
    ) -> Result<UploadImageResponse, ApiError> {
        let context = format!("Failed to upload image for scan {remote_scan_id}");

        let bytes = tokio::fs::read(&image.path)
            .await
            .map_err(|err| ApiError::Io {
                context: context.clone(),
                detail: format!("failed to read {}: {err}", image.path),
            })?;

        let part = Part::bytes(bytes)
            .file_name(format!("{}.jpg", image.slot))
            .mime_str("image/jpeg")
            .map_err(|err| ApiError::Io {
                context: context.clone(),
                detail: err.to_string(),
            })?;
        let form = Form::new()
            .text("slot", image.slot.to_string())
            .text("heading", image.heading.to_string())
            .part("image", part);

        let request = self
            .http
            .post(self.api_url(&format!("/scans/{remote_scan_id}/images")))
            .multipart(form);
        let response = self.send(request, &context).await?;
        Self::decode(response, &context).await
    }

    async fn submit_scan(&self, remote_scan_id: &str) -> Result<SubmitScanResponse, ApiError> {
        let context = format!("Failed to submit scan {remote_scan_id}");
        info!("Submitting scan {remote_scan_id} for reconstruction");
        let request = self
            .http
            .post(self.api_url(&format!("/scans/{remote_scan_id}/submit")));
        let response = self.send(request, &context).await?;
        Self::decode(response, &context).await
    }

    async fn get_job(&self, job_id: &str) -> Result<JobResponse, ApiError> {
        let context = format!("Failed to fetch job {job_id}");
        let request = self.http.get(self.api_url(&format!("/jobs/{job_id}")));
        let response = self.send(request, &context).await?;
        let value = Self::read_value(response, &context).await?;
        parse_job_payload(value).map_err(|err| ApiError::InvalidResponse {
            context,
            detail: err.to_string(),
        })
    }

    fn file_url(&self, remote_scan_id: &str, kind: FileKind) -> String {
        format!(
            "{}/api/files/{remote_scan_id}/{}",
            self.base_url,
            kind.as_str()
        )
    }
}

async fn decode_rejection_detail(response: Response, status: StatusCode) -> String {
    #[derive(Deserialize)]
    struct ErrorPayload {
        message: Option<String>,
        error: Option<String>,
    }

    match response.text().await {
        Ok(body) => {
            if let Ok(payload) = serde_json::from_str::<ErrorPayload>(&body) {
                if let Some(detail) = payload.message.or(payload.error) {
                    return detail;
                }
            }
            if !body.is_empty() {
                return body;
            }
            status.canonical_reason().unwrap_or("Unknown").to_string()
        }
        Err(err) => err.to_string(),
    }
}
