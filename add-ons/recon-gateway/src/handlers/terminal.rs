//! `POST /api/terminal`: one chat turn through the provider router.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use recon_core::{ProviderMode, ProviderUsed};
use serde::{Deserialize, Serialize};

pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct TerminalRequest {
    pub message: String,
    #[serde(default)]
    pub provider: ProviderMode,
}

#[derive(Debug, Serialize)]
pub struct TerminalResponse {
    pub response: String,
    pub timestamp: String,
    pub provider_used: ProviderUsed,
}

pub async fn handle_terminal(
    State(state): State<AppState>,
    Json(req): Json<TerminalRequest>,
) -> Result<Json<TerminalResponse>, ApiError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("Empty message"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::bad_request(format!(
            "Message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    // One snapshot for the whole turn, even if the config is swapped meanwhile.
    let config = state.config.snapshot();
    let reply = state.router.route(&config, message, req.provider).await?;

    if let Some(failure) = &reply.failure {
        tracing::info!(
            target: "recon::gateway",
            reason = %failure.summary(),
            "terminal answered with fallback"
        );
    }

    Ok(Json(TerminalResponse {
        response: reply.text,
        timestamp: chrono::Local::now().format("%H:%M").to_string(),
        provider_used: reply.provider_used,
    }))
}
