use crate::error::ApiError;
use crate::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use recon_core::signature::SIGNATURE_HEADER;
use recon_core::webhook::EVENT_HEADER;
use serde_json::{json, Value};

/// `POST /webhooks/github`. The raw body is verified before it is parsed.
pub async fn handle_github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let config = state.config.snapshot();
    let event = state.webhooks.handle(
        &config.github_webhook_secret,
        &body,
        header(&headers, SIGNATURE_HEADER),
        header(&headers, EVENT_HEADER),
    )?;
    Ok(Json(json!({ "status": "received", "event": event })))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
