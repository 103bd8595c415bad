//! Inventory event ledger and daily snapshot reconciliation
//!
//! The `inventory_events` table is the source of truth for historical stock
//! levels: every stock change appends a signed delta. `inventory_snapshots`
//! holds one derived row per variant per day and is always rewritten from
//! the ledger, never edited in place.
//!
//! Reconciliation for a date replays all events dated on or before it,
//! clamps each variant's running sum at 0, and replaces that date's rows in
//! one shot. Running it twice against the same ledger state stores the same
//! result.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, Transaction};
use serde::Serialize;

use crate::database::DbResult;

/// Ledger entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Add,
    Remove,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Remove => "remove",
        }
    }
}

/// A derived per-day on-hand count for one variant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventorySnapshot {
    pub name: String,
    pub color: Option<String>,
    pub volume: f64,
    pub count: i64,
    pub date: String,
}

/// Normalized variant key: lowercased name, lowercased color ("" when
/// absent), exact volume bits. Sorting is only used to make reconciliation
/// output deterministic.
fn variant_key(name: &str, color: Option<&str>, volume: f64) -> (String, String, u64) {
    (
        name.to_lowercase(),
        color.unwrap_or("").to_lowercase(),
        volume.to_bits(),
    )
}

/// Append a ledger entry inside the caller's transaction
pub(crate) fn record_event_tx(
    tx: &Transaction<'_>,
    name: &str,
    color: Option<&str>,
    volume: f64,
    delta: i64,
    kind: EventKind,
    timestamp: &str,
) -> DbResult<()> {
    tx.execute(
        "INSERT INTO inventory_events (name, color, volume, count, timestamp, event_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![name, color, volume, delta, timestamp, kind.as_str()],
    )?;
    Ok(())
}

/// Running ledger sum for one variant key (0 when the key has no events)
pub(crate) fn ledger_sum_tx(
    tx: &Transaction<'_>,
    name: &str,
    color: Option<&str>,
    volume: f64,
) -> DbResult<i64> {
    tx.query_row(
        "SELECT COALESCE(SUM(count), 0)
         FROM inventory_events
         WHERE lower(name) = lower(?1)
           AND COALESCE(lower(color), '') = COALESCE(lower(?2), '')
           AND volume = ?3",
        params![name, color, volume],
        |row| row.get(0),
    )
}

/// Recompute the snapshots for `date` (YYYY-MM-DD) from the ledger
///
/// Replays every event dated on or before `date` (events ON the day count),
/// then replaces the date's snapshot rows with the clamped per-variant sums.
/// Variants with no events by `date` get no row; variants whose events net
/// to 0 or below get a row with count 0.
///
/// Runs inside the caller's transaction so a failure leaves the previous
/// snapshot state intact. Returns the number of rows written.
pub(crate) fn reconcile_date_tx(tx: &Transaction<'_>, date: &str) -> DbResult<usize> {
    let mut stmt = tx.prepare_cached(
        "SELECT name, color, volume, count
         FROM inventory_events
         WHERE date(timestamp) <= ?1
         ORDER BY id",
    )?;

    let rows = stmt.query_map(params![date], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    // Fold deltas per normalized variant key, keeping the first-seen
    // spelling of name/color for the stored row.
    let mut totals: BTreeMap<(String, String, u64), (String, Option<String>, f64, i64)> =
        BTreeMap::new();
    for row in rows {
        let (name, color, volume, delta) = row?;
        let key = variant_key(&name, color.as_deref(), volume);
        let entry = totals
            .entry(key)
            .or_insert_with(|| (name, color, volume, 0));
        entry.3 += delta;
    }

    tx.execute(
        "DELETE FROM inventory_snapshots WHERE date = ?1",
        params![date],
    )?;

    let mut insert = tx.prepare_cached(
        "INSERT INTO inventory_snapshots (name, color, volume, count, date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut written = 0;
    for (name, color, volume, total) in totals.values() {
        insert.execute(params![name, color, volume, (*total).max(0), date])?;
        written += 1;
    }

    log::debug!("Reconciled {} snapshot rows for {}", written, date);
    Ok(written)
}

/// Ensure an explicit zero-count snapshot row exists for a key on `date`
///
/// Used by inventory deletion when the key has no ledger history, so the
/// deletion is still visible in the day's snapshot.
pub(crate) fn ensure_zero_snapshot_tx(
    tx: &Transaction<'_>,
    name: &str,
    color: Option<&str>,
    volume: f64,
    date: &str,
) -> DbResult<()> {
    let existing: i64 = tx.query_row(
        "SELECT COUNT(*)
         FROM inventory_snapshots
         WHERE lower(name) = lower(?1)
           AND COALESCE(lower(color), '') = COALESCE(lower(?2), '')
           AND volume = ?3
           AND date = ?4",
        params![name, color, volume, date],
        |row| row.get(0),
    )?;
    if existing == 0 {
        tx.execute(
            "INSERT INTO inventory_snapshots (name, color, volume, count, date)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![name, color, volume, date],
        )?;
    }
    Ok(())
}

/// Recompute the snapshots for one date in its own transaction
pub fn reconcile_date(conn: &mut Connection, date: &str) -> DbResult<usize> {
    let tx = conn.transaction()?;
    let written = reconcile_date_tx(&tx, date)?;
    tx.commit()?;
    log::info!("Reconciled {} snapshot rows for {}", written, date);
    Ok(written)
}

/// Snapshot rows with `start <= date <= end`, ordered by date then name
pub fn get_snapshots(
    conn: &Connection,
    start_date: &str,
    end_date: &str,
) -> DbResult<Vec<InventorySnapshot>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, color, volume, count, date
         FROM inventory_snapshots
         WHERE date >= ?1 AND date <= ?2
         ORDER BY date, lower(name), COALESCE(lower(color), '')",
    )?;

    let result = stmt
        .query_map(params![start_date, end_date], |row| {
            Ok(InventorySnapshot {
                name: row.get(0)?,
                color: row.get(1)?,
                volume: row.get(2)?,
                count: row.get(3)?,
                date: row.get(4)?,
            })
        })?
        .collect();
    result
}
