//! Error types for resin_tracker

use std::fmt;

/// Unified error type for tracker operations
#[derive(Debug)]
pub enum TrackerError {
    /// Malformed input (empty name, non-positive volume, negative count)
    Validation(String),
    /// An inventory item with the same identity key already exists
    Conflict {
        name: String,
        color: Option<String>,
        volume: f64,
    },
    /// Referenced entity does not exist
    NotFound(String),
    /// Consumption requested against an item with no stock left
    InsufficientStock { id: i64 },
    /// Database operation failed
    Database(rusqlite::Error),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::Validation(msg) => write!(f, "Validation error: {}", msg),
            TrackerError::Conflict {
                name,
                color,
                volume,
            } => write!(
                f,
                "Bottle with name '{}', color '{}' and volume {}ml already exists",
                name,
                color.as_deref().unwrap_or("none"),
                volume
            ),
            TrackerError::NotFound(what) => write!(f, "{} not found", what),
            TrackerError::InsufficientStock { id } => {
                write!(f, "No bottles left in inventory for item {}", id)
            }
            TrackerError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackerError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        TrackerError::Database(err)
    }
}

/// Result alias for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
