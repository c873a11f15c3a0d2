//! Read side: persisted trip updates reshaped back into the feed's nested
//! JSON form. Optional fields are omitted entirely when absent, matching the
//! upstream convention (no null placeholders).

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;

use crate::api::{internal_error, ErrorResponse};

const DEFAULT_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct TripUpdatesState {
    pub pool: SqlitePool,
}

#[derive(Debug, Deserialize)]
pub struct TripUpdatesQuery {
    /// Maximum number of trip updates to return (default: 100)
    pub limit: Option<i64>,
}

#[derive(Debug, FromRow)]
struct TripUpdateRow {
    id: String,
    trip_id: String,
    start_time: String,
    start_date: String,
    schedule_relationship: String,
    route_id: String,
    direction_id: i64,
    timestamp: String,
    vehicle_id: Option<String>,
}

#[derive(Debug, FromRow)]
struct StopTimeUpdateRow {
    stop_id: String,
    stop_sequence: i64,
    arrival_time: Option<String>,
    arrival_uncertainty: Option<String>,
    departure_time: Option<String>,
    departure_uncertainty: Option<String>,
    schedule_relationship: String,
    trip_update_id: String,
}

/// One trip update in the feed's nested entity form
#[derive(Debug, Serialize, ToSchema)]
pub struct TripUpdateEntity {
    pub id: String,
    #[serde(rename = "tripUpdate")]
    pub trip_update: TripUpdateBody,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TripUpdateBody {
    pub trip: TripDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<VehicleDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_time_update: Option<Vec<StopTimeUpdateBody>>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TripDescriptor {
    pub trip_id: String,
    pub start_time: String,
    pub start_date: String,
    pub schedule_relationship: String,
    pub route_id: String,
    pub direction_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VehicleDescriptor {
    pub id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StopTimeUpdateBody {
    pub stop_sequence: i64,
    pub stop_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival: Option<StopTimeEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure: Option<StopTimeEvent>,
    pub schedule_relationship: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopTimeEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<String>,
}

/// List persisted trip updates in the feed's nested JSON form
#[utoipa::path(
    get,
    path = "/api/trip-updates",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of trip updates to return (default: 100)")
    ),
    responses(
        (status = 200, description = "Reconciled trip updates", body = [TripUpdateEntity]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "trip-updates"
)]
pub async fn list_trip_updates(
    State(state): State<TripUpdatesState>,
    Query(query): Query<TripUpdatesQuery>,
) -> Result<Json<Vec<TripUpdateEntity>>, (StatusCode, Json<ErrorResponse>)> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(0);

    let trip_rows: Vec<TripUpdateRow> = sqlx::query_as(
        r#"
        SELECT id, trip_id, start_time, start_date, schedule_relationship,
               route_id, direction_id, timestamp, vehicle_id
        FROM trip_updates
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let stop_rows: Vec<StopTimeUpdateRow> = sqlx::query_as(
        r#"
        SELECT stop_id, stop_sequence, arrival_time, arrival_uncertainty,
               departure_time, departure_uncertainty, schedule_relationship,
               trip_update_id
        FROM stop_time_updates
        WHERE trip_update_id IN (SELECT id FROM trip_updates ORDER BY id LIMIT ?)
        ORDER BY trip_update_id, stop_sequence
        "#,
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok(Json(reshape(trip_rows, stop_rows)))
}

/// Reassemble flat rows into the nested feed shape, attaching each stop time
/// update to its parent via the synthesized foreign key.
fn reshape(
    trip_rows: Vec<TripUpdateRow>,
    stop_rows: Vec<StopTimeUpdateRow>,
) -> Vec<TripUpdateEntity> {
    let mut children: HashMap<String, Vec<StopTimeUpdateBody>> = HashMap::new();
    for row in stop_rows {
        children
            .entry(row.trip_update_id.clone())
            .or_default()
            .push(reshape_stop_time_update(row));
    }

    trip_rows
        .into_iter()
        .map(|row| {
            // No stopTimeUpdate key at all for a trip with zero children
            let stop_time_update = children.remove(&row.id);
            TripUpdateEntity {
                id: row.id,
                trip_update: TripUpdateBody {
                    trip: TripDescriptor {
                        trip_id: row.trip_id,
                        start_time: row.start_time,
                        start_date: row.start_date,
                        schedule_relationship: row.schedule_relationship,
                        route_id: row.route_id,
                        direction_id: row.direction_id,
                    },
                    vehicle: row.vehicle_id.map(|id| VehicleDescriptor { id }),
                    stop_time_update,
                    timestamp: row.timestamp,
                },
            }
        })
        .collect()
}

fn reshape_stop_time_update(row: StopTimeUpdateRow) -> StopTimeUpdateBody {
    StopTimeUpdateBody {
        stop_sequence: row.stop_sequence,
        stop_id: row.stop_id,
        arrival: stop_time_event(row.arrival_time, row.arrival_uncertainty),
        departure: stop_time_event(row.departure_time, row.departure_uncertainty),
        schedule_relationship: row.schedule_relationship,
    }
}

/// An arrival/departure sub-object exists only when at least one of its
/// fields was stored.
fn stop_time_event(time: Option<String>, uncertainty: Option<String>) -> Option<StopTimeEvent> {
    if time.is_none() && uncertainty.is_none() {
        return None;
    }
    Some(StopTimeEvent { time, uncertainty })
}

pub fn router(pool: SqlitePool) -> Router {
    let state = TripUpdatesState { pool };
    Router::new()
        .route("/", get(list_trip_updates))
        .with_state(state)
}
