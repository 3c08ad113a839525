//! Inbound GitHub webhook handling: authenticate, parse, summarise.

use crate::signature;
use serde_json::{json, Value};

/// Header naming the GitHub event.
pub const EVENT_HEADER: &str = "X-GitHub-Event";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid webhook signature")]
    SignatureInvalid,
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Turns a raw delivery into the event summary echoed back to the sender.
#[derive(Debug, Clone, Default)]
pub struct WebhookProcessor;

impl WebhookProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Verify, parse and summarise one delivery. The signature is checked before the
    /// body is interpreted.
    pub fn handle(
        &self,
        secret: &str,
        raw_body: &[u8],
        signature_header: Option<&str>,
        event_header: Option<&str>,
    ) -> Result<Value, WebhookError> {
        if !signature::verify(secret, raw_body, signature_header) {
            tracing::warn!(target: "recon::webhook", "rejected webhook with invalid signature");
            return Err(WebhookError::SignatureInvalid);
        }
        if secret.is_empty() {
            tracing::warn!(
                target: "recon::webhook",
                "accepting unverified webhook: GITHUB_WEBHOOK_SECRET is empty"
            );
        }
        let payload: Value = serde_json::from_slice(raw_body)?;
        let event_type = event_type_of(event_header, &payload);
        let summary = self.process(&event_type, &payload);
        tracing::info!(target: "recon::webhook", event = %event_type, "webhook received");
        Ok(summary)
    }

    /// Summarise an already authenticated event.
    pub fn process(&self, event_type: &str, payload: &Value) -> Value {
        let timestamp = chrono::Local::now().to_rfc3339();
        match event_type {
            "push" => json!({
                "type": "push",
                "repo": payload.pointer("/repository/name"),
                "branch": payload.get("ref"),
                "pusher": payload.pointer("/pusher/name"),
                "commits": payload.get("commits").and_then(Value::as_array).map_or(0, Vec::len),
                "timestamp": timestamp,
            }),
            "pull_request" => json!({
                "type": "pull_request",
                "action": payload.get("action"),
                "number": payload.pointer("/pull_request/number"),
                "title": payload.pointer("/pull_request/title"),
                "author": payload.pointer("/pull_request/user/login"),
                "timestamp": timestamp,
            }),
            "issues" => json!({
                "type": "issue",
                "action": payload.get("action"),
                "number": payload.pointer("/issue/number"),
                "title": payload.pointer("/issue/title"),
                "author": payload.pointer("/issue/user/login"),
                "timestamp": timestamp,
            }),
            other => json!({ "type": other, "timestamp": timestamp }),
        }
    }
}

/// Header value, else the payload's `type` field, else `"unknown"`.
pub fn event_type_of(header: Option<&str>, payload: &Value) -> String {
    header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .or_else(|| payload.get("type").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string()
}
