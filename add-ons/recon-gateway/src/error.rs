//! JSON error responses: every failure leaves the gateway as `{"detail": "..."}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use recon_core::{ConfigError, FailureClassification, GitHubError, SyncError, WebhookError};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

impl From<FailureClassification> for ApiError {
    fn from(failure: FailureClassification) -> Self {
        let status = StatusCode::from_u16(failure.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
        Self::new(status, failure.detail())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { .. } => Self::bad_request(err.to_string()),
            ConfigError::Load(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::SignatureInvalid => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
            WebhookError::MalformedPayload(_) => Self::bad_request(err.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        tracing::error!(target: "recon::gateway", key = err.key, error = %err.source, "OAuth sync failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<GitHubError> for ApiError {
    fn from(err: GitHubError) -> Self {
        tracing::warn!(target: "recon::gateway", error = %err, "activity fetch failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to fetch activity: {}", err),
        )
    }
}
