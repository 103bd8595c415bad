//! Resin Tracker - Bottle Stock & Consumption Database
//!
//! Serves the tracker API over HTTP with live updates over WebSocket.

use clap::Parser;
use resin_tracker::{init_schema, web, Broadcaster};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Resin bottle stock & consumption tracker server
#[derive(Parser, Debug)]
#[command(name = "resin_tracker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, default_value_t = default_db_path())]
    database: String,

    /// Port for the HTTP API
    #[arg(short, long, default_value_t = 8000)]
    port: u16,
}

/// Returns the default database path: ~/.local/share/resin_tracker/tracker.db
fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("resin_tracker")
        .join("tracker.db")
        .to_string_lossy()
        .to_string()
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let db_path = PathBuf::from(&args.database);

    log::info!("Starting resin_tracker...");
    log::info!("Database path: {}", db_path.display());

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create database directory: {}", e);
                std::process::exit(1);
            }
            log::info!("Created directory: {}", parent.display());
        }
    }

    // Open database connection
    let conn = match Connection::open(&db_path) {
        Ok(conn) => {
            log::info!("Opened database: {}", db_path.display());
            conn
        }
        Err(e) => {
            log::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize database schema
    if let Err(e) = init_schema(&conn) {
        log::error!("Failed to initialize database schema: {}", e);
        std::process::exit(1);
    }

    // Wrap connection in Arc<Mutex> for thread-safe sharing
    let db = Arc::new(Mutex::new(conn));
    let broadcaster = Arc::new(Broadcaster::new());

    if let Err(e) = web::serve(db, broadcaster, args.port).await {
        log::error!("Web server error: {}", e);
        std::process::exit(1);
    }
}
