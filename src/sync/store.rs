//! Existence-only reads of the persisted identity sets.

use std::collections::HashSet;

use sqlx::{Sqlite, Transaction};

/// Identity sets persisted at the start of a reconciliation cycle. Read once,
/// inside the cycle's own transaction, so the diff is computed against a
/// single consistent basis.
#[derive(Debug, Default)]
pub struct ExistingIds {
    pub trip_updates: HashSet<String>,
    pub stop_time_updates: HashSet<String>,
}

impl ExistingIds {
    pub async fn fetch(tx: &mut Transaction<'_, Sqlite>) -> Result<Self, sqlx::Error> {
        let trip_updates: Vec<(String,)> = sqlx::query_as("SELECT id FROM trip_updates")
            .fetch_all(&mut **tx)
            .await?;

        let stop_time_updates: Vec<(String,)> = sqlx::query_as("SELECT id FROM stop_time_updates")
            .fetch_all(&mut **tx)
            .await?;

        Ok(Self {
            trip_updates: trip_updates.into_iter().map(|(id,)| id).collect(),
            stop_time_updates: stop_time_updates.into_iter().map(|(id,)| id).collect(),
        })
    }
}
