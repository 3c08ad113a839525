//! `GET /api/activity`: recent repository activity from GitHub.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use recon_core::{ActivityItem, ACTIVITY_LIMIT};

pub async fn recent_activity(State(state): State<AppState>) -> Result<Json<Vec<ActivityItem>>, ApiError> {
    let config = state.config.snapshot();
    let items = state.github.recent_activity(&config, ACTIVITY_LIMIT).await?;
    Ok(Json(items))
}
