pub mod error;
pub mod health;
pub mod trip_updates;

pub use error::{internal_error, ErrorResponse};

use axum::Router;
use sqlx::SqlitePool;

use crate::sync::CycleStatusStore;

pub fn router(pool: SqlitePool, cycle_status: CycleStatusStore) -> Router {
    Router::new()
        .nest("/trip-updates", trip_updates::router(pool.clone()))
        .nest("/health", health::router(pool, cycle_status))
}
