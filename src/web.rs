//! Web server for the resin tracker
//!
//! REST endpoints for bottles, inventory, and snapshot history, plus a
//! WebSocket endpoint that streams live-update messages from the
//! [`Broadcaster`]. Each named error condition maps to its own status code
//! so callers can tell validation, conflict, missing-entity, and
//! out-of-stock failures apart.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::broadcast::Broadcaster;
use crate::database::{self, BottleUpdate, NewBottle};
use crate::error::TrackerError;
use crate::inventory::{self, NewInventoryItem};
use crate::snapshot;

/// Shared application state (thread-safe database connection + update hub)
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    broadcaster: Arc<Broadcaster>,
}

/// Pagination query parameters
#[derive(Deserialize)]
struct PageParams {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// Snapshot range query parameters (YYYY-MM-DD, inclusive)
#[derive(Deserialize)]
struct SnapshotRange {
    start_date: String,
    end_date: String,
}

#[derive(Deserialize)]
struct NewOpeningEvent {
    volume_used: f64,
}

#[derive(Deserialize)]
struct RestockRequest {
    #[serde(default = "default_restock")]
    amount: i64,
}

fn default_restock() -> i64 {
    1
}

#[derive(Deserialize)]
struct ReconcileRequest {
    date: String,
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn ok_json<T: Serialize>(data: T) -> Response {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    })
    .into_response()
}

fn error_status(err: &TrackerError) -> StatusCode {
    match err {
        TrackerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TrackerError::Conflict { .. } => StatusCode::CONFLICT,
        TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
        TrackerError::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
        TrackerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: TrackerError) -> Response {
    if let TrackerError::Database(e) = &err {
        log::error!("Database error: {}", e);
    }
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        error: Some(err.to_string()),
    };
    (error_status(&err), Json(body)).into_response()
}

fn parse_date(value: &str) -> Result<(), TrackerError> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| TrackerError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", value)))
}

// ── Bottle endpoints ───────────────────────────────────────────────────────

/// GET /bottles?skip={n}&limit={n}
async fn list_bottles_handler(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Response {
    let result = {
        let conn = state.db.lock().unwrap();
        database::list_bottles(&conn, params.skip, params.limit)
    };
    match result {
        Ok(bottles) => ok_json(bottles),
        Err(e) => error_response(e.into()),
    }
}

/// POST /bottles
async fn create_bottle_handler(
    State(state): State<AppState>,
    Json(body): Json<NewBottle>,
) -> Response {
    let result = {
        let conn = state.db.lock().unwrap();
        database::create_bottle(&conn, &body)
    };
    match result {
        Ok(bottle) => {
            state.broadcaster.publish(
                "bottle_created",
                json!({
                    "id": bottle.id,
                    "name": bottle.name,
                    "current_volume": bottle.current_volume,
                }),
            );
            ok_json(bottle)
        }
        Err(e) => error_response(e.into()),
    }
}

/// GET /bottles/{id}
async fn get_bottle_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let result = {
        let conn = state.db.lock().unwrap();
        database::get_bottle(&conn, id)
    };
    match result {
        Ok(Some(bottle)) => ok_json(bottle),
        Ok(None) => error_response(TrackerError::NotFound(format!("Bottle {}", id))),
        Err(e) => error_response(e.into()),
    }
}

/// PATCH /bottles/{id}
async fn update_bottle_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<BottleUpdate>,
) -> Response {
    let result = {
        let conn = state.db.lock().unwrap();
        database::update_bottle(&conn, id, &body)
    };
    match result {
        Ok(Some(bottle)) => {
            state.broadcaster.publish(
                "bottle_updated",
                json!({
                    "id": bottle.id,
                    "name": bottle.name,
                    "current_volume": bottle.current_volume,
                }),
            );
            ok_json(bottle)
        }
        Ok(None) => error_response(TrackerError::NotFound(format!("Bottle {}", id))),
        Err(e) => error_response(e.into()),
    }
}

/// DELETE /bottles/{id}
async fn delete_bottle_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let result = {
        let mut conn = state.db.lock().unwrap();
        database::delete_bottle(&mut conn, id)
    };
    match result {
        Ok(true) => ok_json(json!({"message": "Bottle deleted successfully"})),
        Ok(false) => error_response(TrackerError::NotFound(format!("Bottle {}", id))),
        Err(e) => error_response(e.into()),
    }
}

/// POST /bottles/{id}/events
async fn create_opening_event_handler(
    State(state): State<AppState>,
    Path(bottle_id): Path<i64>,
    Json(body): Json<NewOpeningEvent>,
) -> Response {
    let result = {
        let mut conn = state.db.lock().unwrap();
        match database::create_opening_event(&mut conn, bottle_id, body.volume_used) {
            Ok(event) => match database::get_bottle(&conn, bottle_id) {
                Ok(Some(bottle)) => Ok((event, bottle.current_volume)),
                Ok(None) => Err(TrackerError::NotFound(format!("Bottle {}", bottle_id))),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e),
        }
    };
    match result {
        Ok((event, current_volume)) => {
            state.broadcaster.publish(
                "opening_event_created",
                json!({
                    "bottle_id": bottle_id,
                    "volume_used": event.volume_used,
                    "current_volume": current_volume,
                }),
            );
            ok_json(event)
        }
        Err(e) => error_response(e),
    }
}

// ── Inventory endpoints ────────────────────────────────────────────────────

/// GET /inventory?skip={n}&limit={n}
async fn list_inventory_handler(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Response {
    let result = {
        let conn = state.db.lock().unwrap();
        inventory::list_items(&conn, params.skip, params.limit)
    };
    match result {
        Ok(items) => ok_json(items),
        Err(e) => error_response(e),
    }
}

/// POST /inventory
async fn create_inventory_handler(
    State(state): State<AppState>,
    Json(body): Json<NewInventoryItem>,
) -> Response {
    let result = {
        let mut conn = state.db.lock().unwrap();
        inventory::create_item(&mut conn, &body)
    };
    match result {
        Ok(item) => {
            state.broadcaster.publish(
                "inventory_created",
                json!({
                    "id": item.id,
                    "name": item.name,
                    "color": item.color,
                    "volume": item.volume,
                    "count": item.count,
                }),
            );
            ok_json(item)
        }
        Err(e) => error_response(e),
    }
}

/// DELETE /inventory/{id}
async fn delete_inventory_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let result = {
        let mut conn = state.db.lock().unwrap();
        inventory::delete_item(&mut conn, id)
    };
    match result {
        Ok(item) => {
            state.broadcaster.publish(
                "inventory_deleted",
                json!({
                    "id": item.id,
                    "name": item.name,
                    "color": item.color,
                    "volume": item.volume,
                }),
            );
            ok_json(json!({"message": "Inventory item deleted successfully"}))
        }
        Err(e) => error_response(e),
    }
}

/// POST /inventory/{id}/open
async fn open_inventory_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let result = {
        let mut conn = state.db.lock().unwrap();
        inventory::open_item(&mut conn, id)
    };
    match result {
        Ok(bottle) => {
            state.broadcaster.publish(
                "inventory_opened",
                json!({
                    "id": id,
                    "bottle_id": bottle.id,
                    "name": bottle.name,
                }),
            );
            ok_json(bottle)
        }
        Err(e) => error_response(e),
    }
}

/// POST /inventory/{id}/restock
async fn restock_inventory_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RestockRequest>,
) -> Response {
    let result = {
        let mut conn = state.db.lock().unwrap();
        inventory::restock_item(&mut conn, id, body.amount)
    };
    match result {
        Ok(item) => {
            state.broadcaster.publish(
                "inventory_restocked",
                json!({
                    "id": item.id,
                    "count": item.count,
                }),
            );
            ok_json(item)
        }
        Err(e) => error_response(e),
    }
}

// ── Snapshot endpoints ─────────────────────────────────────────────────────

/// GET /inventory_snapshots?start_date={d}&end_date={d}
async fn snapshots_handler(
    State(state): State<AppState>,
    Query(range): Query<SnapshotRange>,
) -> Response {
    if let Err(e) = parse_date(&range.start_date).and_then(|_| parse_date(&range.end_date)) {
        return error_response(e);
    }
    let result = {
        let conn = state.db.lock().unwrap();
        snapshot::get_snapshots(&conn, &range.start_date, &range.end_date)
    };
    match result {
        Ok(rows) => ok_json(rows),
        Err(e) => error_response(e.into()),
    }
}

/// POST /inventory_snapshots/reconcile
async fn reconcile_handler(
    State(state): State<AppState>,
    Json(body): Json<ReconcileRequest>,
) -> Response {
    if let Err(e) = parse_date(&body.date) {
        return error_response(e);
    }
    let result = {
        let mut conn = state.db.lock().unwrap();
        snapshot::reconcile_date(&mut conn, &body.date)
    };
    match result {
        Ok(variants) => ok_json(json!({"date": body.date, "variants": variants})),
        Err(e) => error_response(e.into()),
    }
}

// ── WebSocket endpoint ─────────────────────────────────────────────────────

/// GET /ws - live update stream
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broadcaster.clone()))
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let (id, mut updates) = broadcaster.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = updates.recv() => match outbound {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = stream.next() => match inbound {
                // Inbound payloads are ignored; the socket is one-way
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    broadcaster.unsubscribe(id);
    log::debug!("WebSocket session {} closed", id);
}

// ── Server setup ───────────────────────────────────────────────────────────

/// Build the web server router
pub fn create_router(db: Arc<Mutex<Connection>>, broadcaster: Arc<Broadcaster>) -> Router {
    let state = AppState { db, broadcaster };

    // The dashboard frontend is served separately, so allow any origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/bottles", get(list_bottles_handler).post(create_bottle_handler))
        .route(
            "/bottles/{id}",
            get(get_bottle_handler)
                .patch(update_bottle_handler)
                .delete(delete_bottle_handler),
        )
        .route("/bottles/{id}/events", post(create_opening_event_handler))
        .route(
            "/inventory",
            get(list_inventory_handler).post(create_inventory_handler),
        )
        .route("/inventory/{id}", axum::routing::delete(delete_inventory_handler))
        .route("/inventory/{id}/open", post(open_inventory_handler))
        .route("/inventory/{id}/restock", post(restock_inventory_handler))
        .route("/inventory_snapshots", get(snapshots_handler))
        .route("/inventory_snapshots/reconcile", post(reconcile_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Start the web server (async)
///
/// Binds to 0.0.0.0 (all interfaces) to work with Docker port mapping.
/// Shuts down cleanly on ctrl-c.
pub async fn serve(
    db: Arc<Mutex<Connection>>,
    broadcaster: Arc<Broadcaster>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(db, broadcaster);
    let addr = format!("0.0.0.0:{}", port);

    log::info!("API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::info!("Shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_schema;

    fn test_state() -> (Arc<Mutex<Connection>>, Arc<Broadcaster>) {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        (Arc::new(Mutex::new(conn)), Arc::new(Broadcaster::new()))
    }

    #[test]
    fn test_create_router() {
        let (db, broadcaster) = test_state();
        let _router = create_router(db, broadcaster);
    }

    #[test]
    fn error_statuses_are_distinct_per_variant() {
        assert_eq!(
            error_status(&TrackerError::Validation("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            error_status(&TrackerError::Conflict {
                name: "x".into(),
                color: None,
                volume: 1.0
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&TrackerError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&TrackerError::InsufficientStock { id: 1 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&TrackerError::Database(rusqlite::Error::InvalidQuery)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_api_response_serialization() {
        let response: ApiResponse<Vec<i32>> = ApiResponse {
            success: true,
            data: Some(vec![1, 2, 3]),
            error: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\":[1,2,3]"));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_api_response_error_serialization() {
        let response: ApiResponse<()> = ApiResponse {
            success: false,
            data: None,
            error: Some("Test error".to_string()),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"error\":\"Test error\""));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn parse_date_accepts_iso_dates_only() {
        assert!(parse_date("2026-03-01").is_ok());
        assert!(parse_date("03/01/2026").is_err());
        assert!(parse_date("2026-13-40").is_err());
        assert!(parse_date("").is_err());
    }
}
