//! Leg listing and single-leg lookup

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rra_common::db::{get_leg, recent_legs, LegKey, Service, Variant};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::workflow::export::ExportRecord;
use crate::AppState;

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct LegsQuery {
    /// Kept as text so a malformed value gets a JSON 400
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LegsResponse {
    pub limit: usize,
    pub count: usize,
    pub legs: Vec<ExportRecord>,
}

/// Parse and clamp `?limit=` to 1..=500
pub fn resolve_limit(raw: Option<&str>) -> ApiResult<usize> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_LIMIT);
    };
    let requested: i64 = raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("limit must be an integer, got {:?}", raw)))?;
    Ok(requested.clamp(1, MAX_LIMIT as i64) as usize)
}

/// GET /api/legs?limit=N
pub async fn list_legs(
    State(state): State<AppState>,
    Query(query): Query<LegsQuery>,
) -> ApiResult<Json<LegsResponse>> {
    let limit = resolve_limit(query.limit.as_deref())?;
    let legs: Vec<ExportRecord> = recent_legs(&state.db, limit)
        .await?
        .into_iter()
        .map(ExportRecord::from)
        .collect();

    Ok(Json(LegsResponse {
        limit,
        count: legs.len(),
        legs,
    }))
}

/// GET /api/legs/:item_id/:variant/:service
pub async fn get_leg_by_key(
    State(state): State<AppState>,
    Path((item_id, variant, service)): Path<(String, String, String)>,
) -> ApiResult<Json<ExportRecord>> {
    let variant: Variant = variant.parse()?;
    let service: Service = service.parse()?;
    let key = LegKey::new(item_id, variant, service);

    let leg = get_leg(&state.db, &key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Leg {}", key)))?;

    Ok(Json(ExportRecord::from(leg)))
}
