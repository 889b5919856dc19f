use thiserror::Error;

/// Client-side failure taxonomy for the remote scan service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Timeout or connection failure. The only variant worth retrying.
    #[error("{context} (network error or timeout: {detail})")]
    Network { context: String, detail: String },

    /// The server answered with a non-2xx status and (usually) a message.
    #[error("{context} (HTTP {status}: {detail})")]
    Rejected {
        context: String,
        status: u16,
        detail: String,
    },

    /// The response body did not match the expected schema.
    #[error("{context}: invalid response ({detail})")]
    InvalidResponse { context: String, detail: String },

    /// Local file access failed while preparing a request.
    #[error("{context}: {detail}")]
    Io { context: String, detail: String },
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }
}
