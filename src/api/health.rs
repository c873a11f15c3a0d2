use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;

use crate::api::{internal_error, ErrorResponse};
use crate::sync::{CycleStatusStore, LastCycle};

#[derive(Clone)]
pub struct HealthState {
    pub pool: SqlitePool,
    pub cycle_status: CycleStatusStore,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    /// Number of persisted trip updates
    pub trip_update_count: i64,
    /// Number of persisted stop time updates
    pub stop_time_update_count: i64,
    /// Outcome of the most recent successful reconciliation cycle, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<LastCycle>,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "health"
)]
pub async fn health_check(
    State(state): State<HealthState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ErrorResponse>)> {
    let (trip_update_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trip_updates")
        .fetch_one(&state.pool)
        .await
        .map_err(internal_error)?;

    let (stop_time_update_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM stop_time_updates")
            .fetch_one(&state.pool)
            .await
            .map_err(internal_error)?;

    let last_cycle = state.cycle_status.read().await.clone();

    Ok(Json(HealthResponse {
        healthy: true,
        trip_update_count,
        stop_time_update_count,
        last_cycle,
    }))
}

pub fn router(pool: SqlitePool, cycle_status: CycleStatusStore) -> Router {
    let state = HealthState { pool, cycle_status };
    Router::new().route("/", get(health_check)).with_state(state)
}
