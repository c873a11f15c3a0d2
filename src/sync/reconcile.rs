//! Set reconciliation between one feed snapshot and the persisted store.
//!
//! Planning is pure: the snapshot's identity indexes and the persisted id
//! sets partition into three disjoint operation sets per entity type. The
//! apply phase runs every operation inside the caller's transaction, so a
//! cycle either lands completely or not at all.

use std::collections::HashSet;

use sqlx::{Sqlite, Transaction};

use super::snapshot::{Snapshot, StopTimeRecord, TripUpdateRecord};
use super::store::ExistingIds;

/// Max ids per purge statement, well under SQLite's bind parameter limit
const PURGE_CHUNK: usize = 500;

/// Disjoint operation sets for one reconciliation cycle.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub purge_trip_updates: Vec<String>,
    pub insert_trip_updates: HashSet<String>,
    pub update_trip_updates: HashSet<String>,
    pub purge_stop_time_updates: Vec<String>,
    pub insert_stop_time_updates: HashSet<String>,
    pub update_stop_time_updates: HashSet<String>,
}

/// Row counts applied by one cycle.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, utoipa::ToSchema)]
pub struct ReconcileStats {
    pub trip_updates_purged: u64,
    pub trip_updates_inserted: u64,
    pub trip_updates_updated: u64,
    pub stop_time_updates_purged: u64,
    pub stop_time_updates_inserted: u64,
    pub stop_time_updates_updated: u64,
}

/// Partition the snapshot against the persisted identity sets.
///
/// Stop time update candidates are the synthesized ids of every child
/// declared in the snapshot; anything persisted outside that set is purged,
/// which also covers a surviving trip that dropped one of its stops.
pub fn plan(snapshot: &Snapshot, existing: &ExistingIds) -> ReconcilePlan {
    let snapshot_trip_ids = snapshot.trip_update_ids();
    let snapshot_stop_time_ids = snapshot.stop_time_update_ids();

    let mut plan = ReconcilePlan::default();

    for id in &existing.trip_updates {
        if !snapshot_trip_ids.contains(id) {
            plan.purge_trip_updates.push(id.clone());
        }
    }
    for id in snapshot_trip_ids {
        if existing.trip_updates.contains(&id) {
            plan.update_trip_updates.insert(id);
        } else {
            plan.insert_trip_updates.insert(id);
        }
    }

    for id in &existing.stop_time_updates {
        if !snapshot_stop_time_ids.contains(id) {
            plan.purge_stop_time_updates.push(id.clone());
        }
    }
    for id in snapshot_stop_time_ids {
        if existing.stop_time_updates.contains(&id) {
            plan.update_stop_time_updates.insert(id);
        } else {
            plan.insert_stop_time_updates.insert(id);
        }
    }

    // Deterministic purge order keeps chunking and logs stable
    plan.purge_trip_updates.sort();
    plan.purge_stop_time_updates.sort();

    plan
}

/// Apply the plan inside the cycle's transaction. Order is constrained by
/// the foreign key: children are deleted before their parents, parents
/// written before their children.
pub async fn apply(
    tx: &mut Transaction<'_, Sqlite>,
    snapshot: &Snapshot,
    plan: &ReconcilePlan,
) -> Result<ReconcileStats, sqlx::Error> {
    let mut stats = ReconcileStats::default();

    // Explicit cascade: a purged trip update takes all of its children with
    // it, independent of what the child id diff alone would remove.
    stats.stop_time_updates_purged += delete_chunked(
        tx,
        "DELETE FROM stop_time_updates WHERE trip_update_id IN",
        &plan.purge_trip_updates,
    )
    .await?;

    stats.stop_time_updates_purged += delete_chunked(
        tx,
        "DELETE FROM stop_time_updates WHERE id IN",
        &plan.purge_stop_time_updates,
    )
    .await?;

    stats.trip_updates_purged += delete_chunked(
        tx,
        "DELETE FROM trip_updates WHERE id IN",
        &plan.purge_trip_updates,
    )
    .await?;

    for trip_update in &snapshot.trip_updates {
        if plan.insert_trip_updates.contains(&trip_update.id) {
            insert_trip_update(tx, trip_update).await?;
            stats.trip_updates_inserted += 1;
        } else if plan.update_trip_updates.contains(&trip_update.id) {
            update_trip_update(tx, trip_update).await?;
            stats.trip_updates_updated += 1;
        }
    }

    for trip_update in &snapshot.trip_updates {
        for stu in &trip_update.stop_time_updates {
            if plan.insert_stop_time_updates.contains(&stu.id) {
                insert_stop_time_update(tx, stu).await?;
                stats.stop_time_updates_inserted += 1;
            } else if plan.update_stop_time_updates.contains(&stu.id) {
                update_stop_time_update(tx, stu).await?;
                stats.stop_time_updates_updated += 1;
            }
        }
    }

    Ok(stats)
}

async fn delete_chunked(
    tx: &mut Transaction<'_, Sqlite>,
    sql_prefix: &str,
    ids: &[String],
) -> Result<u64, sqlx::Error> {
    let mut deleted = 0;

    for chunk in ids.chunks(PURGE_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("{sql_prefix} ({placeholders})");

        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(id);
        }

        deleted += query.execute(&mut **tx).await?.rows_affected();
    }

    Ok(deleted)
}

async fn insert_trip_update(
    tx: &mut Transaction<'_, Sqlite>,
    tu: &TripUpdateRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO trip_updates
            (id, trip_id, start_time, start_date, schedule_relationship,
             route_id, direction_id, timestamp, vehicle_id, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
        "#,
    )
    .bind(&tu.id)
    .bind(&tu.trip_id)
    .bind(&tu.start_time)
    .bind(&tu.start_date)
    .bind(&tu.schedule_relationship)
    .bind(&tu.route_id)
    .bind(tu.direction_id)
    .bind(&tu.timestamp)
    .bind(&tu.vehicle_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Full overwrite: every mutable column is rewritten from the snapshot, so a
/// field that went absent upstream (a vehicle id dropped on cancellation)
/// clears the stored value instead of keeping the stale one.
async fn update_trip_update(
    tx: &mut Transaction<'_, Sqlite>,
    tu: &TripUpdateRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE trip_updates SET
            trip_id = ?,
            start_time = ?,
            start_date = ?,
            schedule_relationship = ?,
            route_id = ?,
            direction_id = ?,
            timestamp = ?,
            vehicle_id = ?,
            updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(&tu.trip_id)
    .bind(&tu.start_time)
    .bind(&tu.start_date)
    .bind(&tu.schedule_relationship)
    .bind(&tu.route_id)
    .bind(tu.direction_id)
    .bind(&tu.timestamp)
    .bind(&tu.vehicle_id)
    .bind(&tu.id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_stop_time_update(
    tx: &mut Transaction<'_, Sqlite>,
    stu: &StopTimeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO stop_time_updates
            (id, stop_id, stop_sequence, arrival_time, arrival_uncertainty,
             departure_time, departure_uncertainty, schedule_relationship,
             trip_update_id, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
        "#,
    )
    .bind(&stu.id)
    .bind(&stu.stop_id)
    .bind(stu.stop_sequence)
    .bind(&stu.arrival_time)
    .bind(&stu.arrival_uncertainty)
    .bind(&stu.departure_time)
    .bind(&stu.departure_uncertainty)
    .bind(&stu.schedule_relationship)
    .bind(&stu.trip_update_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn update_stop_time_update(
    tx: &mut Transaction<'_, Sqlite>,
    stu: &StopTimeRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE stop_time_updates SET
            stop_id = ?,
            stop_sequence = ?,
            arrival_time = ?,
            arrival_uncertainty = ?,
            departure_time = ?,
            departure_uncertainty = ?,
            schedule_relationship = ?,
            trip_update_id = ?,
            updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(&stu.stop_id)
    .bind(stu.stop_sequence)
    .bind(&stu.arrival_time)
    .bind(&stu.arrival_uncertainty)
    .bind(&stu.departure_time)
    .bind(&stu.departure_uncertainty)
    .bind(&stu.schedule_relationship)
    .bind(&stu.trip_update_id)
    .bind(&stu.id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
