//! Feed reconciliation: fetch a snapshot of the upstream trip updates feed
//! and reconcile the persisted store against it.
//!
//! One cycle is fetch → validate → diff → apply, with the apply phase inside
//! a single transaction. Cycles against the same store are serialized; a
//! failed cycle leaves the store exactly as it was.

pub mod reconcile;
pub mod snapshot;
pub mod store;

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::providers::swiftly::{FeedError, SwiftlyClient};
use reconcile::ReconcileStats;
use snapshot::{Snapshot, SnapshotError};
use store::ExistingIds;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Feed fetch failed: {0}")]
    Fetch(#[from] FeedError),
    #[error("Snapshot rejected: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of the most recent successful reconciliation cycle.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct LastCycle {
    /// Completion time (RFC 3339)
    pub completed_at: String,
    pub stats: ReconcileStats,
}

/// Shared handle the health endpoint reads the last cycle outcome from.
pub type CycleStatusStore = Arc<RwLock<Option<LastCycle>>>;

/// Drives reconciliation cycles against one persisted store.
pub struct SyncManager {
    pool: SqlitePool,
    client: SwiftlyClient,
    config: SyncConfig,
    /// Serializes cycles: two apply phases must never interleave on the
    /// same store.
    cycle_lock: Mutex<()>,
    status: CycleStatusStore,
}

impl SyncManager {
    pub fn new(pool: SqlitePool, client: SwiftlyClient, config: SyncConfig) -> Self {
        Self {
            pool,
            client,
            config,
            cycle_lock: Mutex::new(()),
            status: Arc::new(RwLock::new(None)),
        }
    }

    /// Get a reference to the cycle status store for API access
    pub fn status_store(&self) -> CycleStatusStore {
        self.status.clone()
    }

    /// Run reconciliation cycles forever at the configured interval. A
    /// failed cycle is logged and retried no earlier than the next tick.
    pub async fn start(self: Arc<Self>) {
        info!(
            interval_secs = self.config.interval_secs,
            "Starting feed sync loop"
        );

        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(self.config.interval_secs));

        loop {
            // The first tick fires immediately, so startup runs a cycle
            // right away
            interval.tick().await;

            match self.run_cycle().await {
                Ok(stats) => {
                    info!(
                        trip_updates_purged = stats.trip_updates_purged,
                        trip_updates_inserted = stats.trip_updates_inserted,
                        trip_updates_updated = stats.trip_updates_updated,
                        stop_time_updates_purged = stats.stop_time_updates_purged,
                        stop_time_updates_inserted = stats.stop_time_updates_inserted,
                        stop_time_updates_updated = stats.stop_time_updates_updated,
                        "Completed reconciliation cycle"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation cycle failed, store left untouched");
                }
            }
        }
    }

    /// Run one reconciliation cycle: fetch, validate, diff, apply. Either
    /// the store reflects the fetched snapshot fully afterwards, or the
    /// error is returned and the store is exactly as it was.
    pub async fn run_cycle(&self) -> Result<ReconcileStats, SyncError> {
        let _guard = self.cycle_lock.lock().await;

        let feed = self.client.fetch_trip_updates().await?;
        let snapshot = Snapshot::from_feed(feed)?;

        let stats = self.reconcile_snapshot(&snapshot).await?;

        let mut status = self.status.write().await;
        *status = Some(LastCycle {
            completed_at: Utc::now().to_rfc3339(),
            stats,
        });

        Ok(stats)
    }

    /// Diff against the identity sets read inside the cycle's transaction,
    /// then apply and commit.
    async fn reconcile_snapshot(&self, snapshot: &Snapshot) -> Result<ReconcileStats, SyncError> {
        let mut tx = self.pool.begin().await?;

        let existing = ExistingIds::fetch(&mut tx).await?;
        let plan = reconcile::plan(snapshot, &existing);
        let stats = reconcile::apply(&mut tx, snapshot, &plan).await?;

        tx.commit().await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn failed_fetch_aborts_before_touching_the_store() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO trip_updates \
                 (id, trip_id, start_time, start_date, schedule_relationship, \
                  route_id, direction_id, timestamp) \
             VALUES ('T1', '100', '08:00:00', '20240101', 'SCHEDULED', '22', 0, '1700000000')",
        )
        .execute(&pool)
        .await
        .unwrap();

        // Nothing listens on this port; the fetch fails before any diff or
        // write happens
        let feed = FeedConfig {
            url: "http://127.0.0.1:9".to_string(),
            api_key: "unused".to_string(),
            timeout_secs: 1,
        };
        let client = SwiftlyClient::new(&feed).expect("build client");
        let manager = SyncManager::new(pool.clone(), client, SyncConfig::default());

        let result = manager.run_cycle().await;
        assert!(matches!(result, Err(SyncError::Fetch(_))));
        assert!(manager.status_store().read().await.is_none());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trip_updates")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
