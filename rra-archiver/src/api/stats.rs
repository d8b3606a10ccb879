//! Aggregate leg counts

use axum::{extract::State, Json};
use rra_common::db::{leg_stats, LegStats};

use crate::error::ApiResult;
use crate::AppState;

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<LegStats>> {
    Ok(Json(leg_stats(&state.db).await?))
}
