//! Resin Tracker - Bottle Stock & Consumption Database
//!
//! Tracks resin-bottle inventory for a small production operation: stock
//! additions and removals land in an append-only event ledger, opening
//! (consumption) events are logged per bottle, and daily per-variant
//! snapshots are derived from the ledger for historical reporting.
//! Connected viewers receive live updates over WebSocket.

pub mod broadcast;
pub mod database;
pub mod error;
pub mod inventory;
pub mod snapshot;
pub mod web;

// Re-export commonly used items
pub use broadcast::Broadcaster;
pub use database::{init_schema, Bottle, BottleUpdate, NewBottle, OpeningEvent};
pub use error::{Result, TrackerError};
pub use inventory::{InventoryItem, NewInventoryItem};
pub use snapshot::InventorySnapshot;
