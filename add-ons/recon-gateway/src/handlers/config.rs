//! Local-only runtime configuration routes.

use super::ensure_local;
use crate::error::ApiError;
use crate::AppState;
use axum::extract::{ConnectInfo, State};
use axum::Json;
use recon_core::{ConfigUpdate, ConfigView, ReadinessReport};
use serde_json::{json, Value};
use std::net::SocketAddr;

/// `GET /api/config`
pub async fn get_config(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Json<ConfigView>, ApiError> {
    ensure_local(&peer)?;
    Ok(Json(state.config.snapshot().view()))
}

/// `POST /api/config`. Invalid input rejects the whole update; the snapshot is unchanged.
pub async fn update_config(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<ConfigView>, ApiError> {
    ensure_local(&peer)?;
    let next = state.config.update(&update)?;
    Ok(Json(next.view()))
}

/// `POST /api/config/sync-convex-auth`
pub async fn sync_convex_auth(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    ensure_local(&peer)?;
    let config = state.config.snapshot();
    let outcome = recon_core::sync_oauth_env(&config, state.env_writer.as_ref()).await?;
    Ok(Json(json!({
        "ok": true,
        "updated_keys": outcome.synced,
        "message": outcome.message,
    })))
}

/// `GET /api/config/diagnostics`
pub async fn diagnostics(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Json<ReadinessReport>, ApiError> {
    ensure_local(&peer)?;
    let config = state.config.snapshot();
    Ok(Json(recon_core::evaluate(&config, state.env_lookup.as_ref()).await))
}
