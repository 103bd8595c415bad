//! Database operations for the resin tracker
//!
//! Uses parameterized queries exclusively (no SQL string concatenation).
//! Every multi-row mutation runs inside a transaction, so a failed step
//! never leaves a half-applied operation behind.
//!
//! Timestamps are written by this layer in local time (`YYYY-MM-DD HH:MM:SS`)
//! instead of SQL defaults, so date arithmetic lines up with the local
//! "today" used by the snapshot reconciler.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Result type for database operations
pub type DbResult<T> = rusqlite::Result<T>;

/// Initialize the database schema
///
/// Creates tables if they don't exist:
/// - `bottles`: opened bottles, tracked independently of inventory
/// - `opening_events`: append-only consumption log per bottle
/// - `inventory_items`: stocked product variants with a live on-hand count
/// - `inventory_events`: append-only stock ledger (signed deltas)
/// - `inventory_snapshots`: derived per-day on-hand counts per variant
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS bottles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            initial_volume REAL NOT NULL,
            current_volume REAL NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS opening_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bottle_id INTEGER NOT NULL REFERENCES bottles(id),
            timestamp TEXT NOT NULL,
            volume_used REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_opening_events_bottle ON opening_events(bottle_id);

        CREATE TABLE IF NOT EXISTS inventory_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            color TEXT,
            volume REAL NOT NULL,
            count INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        -- Identity key: case-insensitive (name, color, volume), NULL color
        -- folded to the empty string so two colorless variants collide.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_inventory_identity
            ON inventory_items (lower(name), COALESCE(lower(color), ''), volume);

        CREATE TABLE IF NOT EXISTS inventory_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            color TEXT,
            volume REAL NOT NULL,
            count INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL CHECK (event_type IN ('add', 'remove'))
        );

        CREATE INDEX IF NOT EXISTS idx_inventory_events_timestamp ON inventory_events(timestamp);

        CREATE TABLE IF NOT EXISTS inventory_snapshots (
            name TEXT NOT NULL,
            color TEXT,
            volume REAL NOT NULL,
            count INTEGER NOT NULL,
            date TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshot_identity
            ON inventory_snapshots (lower(name), COALESCE(lower(color), ''), volume, date);

        CREATE INDEX IF NOT EXISTS idx_snapshot_date ON inventory_snapshots(date);
        ",
    )?;

    log::info!("Database schema initialized");
    Ok(())
}

/// An opened bottle (for API responses, with its consumption log)
#[derive(Debug, Clone, Serialize)]
pub struct Bottle {
    pub id: i64,
    pub name: String,
    pub initial_volume: f64,
    pub current_volume: f64,
    pub created_at: String,
    pub opening_events: Vec<OpeningEvent>,
}

/// A consumption event against a bottle (append-only)
#[derive(Debug, Clone, Serialize)]
pub struct OpeningEvent {
    pub id: i64,
    pub bottle_id: i64,
    pub timestamp: String,
    pub volume_used: f64,
}

/// Payload for creating a bottle directly (not tied to inventory)
#[derive(Debug, Clone, Deserialize)]
pub struct NewBottle {
    pub name: String,
    pub initial_volume: f64,
    pub current_volume: f64,
}

/// Partial update for a bottle
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BottleUpdate {
    pub name: Option<String>,
    pub current_volume: Option<f64>,
}

/// Current local timestamp as `YYYY-MM-DD HH:MM:SS`
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Today's date as `YYYY-MM-DD` using local system time
pub fn today_date() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Extract the date (YYYY-MM-DD) from a timestamp string
pub(crate) fn date_part(timestamp: &str) -> String {
    timestamp.chars().take(10).collect()
}

/// Create a bottle with arbitrary volumes
pub fn create_bottle(conn: &Connection, new: &NewBottle) -> DbResult<Bottle> {
    create_bottle_at(conn, new, &now_timestamp())
}

pub(crate) fn create_bottle_at(conn: &Connection, new: &NewBottle, now: &str) -> DbResult<Bottle> {
    conn.execute(
        "INSERT INTO bottles (name, initial_volume, current_volume, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![&new.name, new.initial_volume, new.current_volume, now],
    )?;
    let id = conn.last_insert_rowid();
    log::info!("Created bottle {} '{}'", id, new.name);
    Ok(Bottle {
        id,
        name: new.name.clone(),
        initial_volume: new.initial_volume,
        current_volume: new.current_volume,
        created_at: now.to_string(),
        opening_events: Vec::new(),
    })
}

/// Get a bottle by id, with its opening events
pub fn get_bottle(conn: &Connection, id: i64) -> DbResult<Option<Bottle>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, initial_volume, current_volume, created_at
         FROM bottles
         WHERE id = ?1",
    )?;

    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => {
            let mut bottle = Bottle {
                id: row.get(0)?,
                name: row.get(1)?,
                initial_volume: row.get(2)?,
                current_volume: row.get(3)?,
                created_at: row.get(4)?,
                opening_events: Vec::new(),
            };
            bottle.opening_events = events_for_bottle(conn, bottle.id)?;
            Ok(Some(bottle))
        }
        None => Ok(None),
    }
}

/// List bottles in insertion order, with their opening events
pub fn list_bottles(conn: &Connection, skip: i64, limit: i64) -> DbResult<Vec<Bottle>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, initial_volume, current_volume, created_at
         FROM bottles
         ORDER BY id
         LIMIT ?1 OFFSET ?2",
    )?;

    let mut bottles: Vec<Bottle> = stmt
        .query_map(params![limit, skip], |row| {
            Ok(Bottle {
                id: row.get(0)?,
                name: row.get(1)?,
                initial_volume: row.get(2)?,
                current_volume: row.get(3)?,
                created_at: row.get(4)?,
                opening_events: Vec::new(),
            })
        })?
        .collect::<DbResult<_>>()?;

    for bottle in &mut bottles {
        bottle.opening_events = events_for_bottle(conn, bottle.id)?;
    }
    Ok(bottles)
}

fn events_for_bottle(conn: &Connection, bottle_id: i64) -> DbResult<Vec<OpeningEvent>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, bottle_id, timestamp, volume_used
         FROM opening_events
         WHERE bottle_id = ?1
         ORDER BY id",
    )?;

    let result = stmt
        .query_map(params![bottle_id], |row| {
            Ok(OpeningEvent {
                id: row.get(0)?,
                bottle_id: row.get(1)?,
                timestamp: row.get(2)?,
                volume_used: row.get(3)?,
            })
        })?
        .collect();
    result
}

/// Apply a partial update to a bottle
///
/// Returns the updated bottle, or `None` if no such id.
pub fn update_bottle(conn: &Connection, id: i64, update: &BottleUpdate) -> DbResult<Option<Bottle>> {
    let changed = conn.execute(
        "UPDATE bottles
         SET name = COALESCE(?1, name),
             current_volume = COALESCE(?2, current_volume)
         WHERE id = ?3",
        params![&update.name, update.current_volume, id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_bottle(conn, id)
}

/// Delete a bottle and its opening events
///
/// Returns `true` if the bottle existed. Both deletions run in one
/// transaction.
pub fn delete_bottle(conn: &mut Connection, id: i64) -> DbResult<bool> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM opening_events WHERE bottle_id = ?1", params![id])?;
    let deleted = tx.execute("DELETE FROM bottles WHERE id = ?1", params![id])?;
    tx.commit()?;
    if deleted > 0 {
        log::info!("Deleted bottle {}", id);
    }
    Ok(deleted > 0)
}

/// Record a partial-consumption event against a bottle
///
/// Decrements `current_volume` by `volume_used` in the same transaction as
/// the event insert. The volume floor is enforced here: an event that would
/// drive `current_volume` below 0 is rejected and nothing is written.
pub fn create_opening_event(
    conn: &mut Connection,
    bottle_id: i64,
    volume_used: f64,
) -> Result<OpeningEvent> {
    create_opening_event_at(conn, bottle_id, volume_used, &now_timestamp())
}

pub(crate) fn create_opening_event_at(
    conn: &mut Connection,
    bottle_id: i64,
    volume_used: f64,
    now: &str,
) -> Result<OpeningEvent> {
    if !(volume_used > 0.0) {
        return Err(TrackerError::Validation(
            "volume_used must be positive".to_string(),
        ));
    }

    let tx = conn.transaction()?;

    let current_volume: f64 = {
        let mut stmt = tx.prepare_cached("SELECT current_volume FROM bottles WHERE id = ?1")?;
        let mut rows = stmt.query(params![bottle_id])?;
        match rows.next()? {
            Some(row) => row.get(0)?,
            None => return Err(TrackerError::NotFound(format!("Bottle {}", bottle_id))),
        }
    };

    if volume_used > current_volume {
        return Err(TrackerError::Validation(format!(
            "volume_used {} exceeds current volume {}",
            volume_used, current_volume
        )));
    }

    tx.execute(
        "INSERT INTO opening_events (bottle_id, timestamp, volume_used)
         VALUES (?1, ?2, ?3)",
        params![bottle_id, now, volume_used],
    )?;
    let event_id = tx.last_insert_rowid();

    tx.execute(
        "UPDATE bottles SET current_volume = current_volume - ?1 WHERE id = ?2",
        params![volume_used, bottle_id],
    )?;

    tx.commit()?;
    log::info!(
        "Opening event {} on bottle {}: used {}ml",
        event_id,
        bottle_id,
        volume_used
    );

    Ok(OpeningEvent {
        id: event_id,
        bottle_id,
        timestamp: now.to_string(),
        volume_used,
    })
}
