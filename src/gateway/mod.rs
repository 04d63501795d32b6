//! HTTP/WebSocket gateway
//!
//! One WebSocket endpoint carries the whole dispatch protocol; the admin
//! route is the entry point for the external administrative surface pushing
//! account status changes to live driver sessions.

pub mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::websocket::ws_handler;
use state::AppState;

/// Build the gateway router
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .route("/admin/drivers/{driver_id}/status", post(set_driver_status))
        .with_state(app_state)
}

/// Health check response data
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_ms: u64,
}

/// Health check endpoint
///
/// Pings the store at most once per interval; within the interval the last
/// verdict is assumed.
async fn health_check(
    State(app_state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    static LAST_CHECK_MS: AtomicU64 = AtomicU64::new(0);
    const CHECK_INTERVAL_MS: u64 = 5000;

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let last_check = LAST_CHECK_MS.load(Ordering::Relaxed);
    let healthy = if now_ms.saturating_sub(last_check) > CHECK_INTERVAL_MS {
        LAST_CHECK_MS.store(now_ms, Ordering::Relaxed);
        match &app_state.db {
            Some(db) => match db.health_check().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "[HEALTH] Store ping failed");
                    false
                }
            },
            // Mem-store mode has no external dependency
            None => true,
        }
    } else {
        true
    };

    if healthy {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                timestamp_ms: now_ms,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                timestamp_ms: now_ms,
            }),
        )
    }
}

/// Administrative account status change
#[derive(Debug, Deserialize)]
struct DriverStatusUpdate {
    active: bool,
}

/// Forward an account status change to the affected driver's live session.
/// Persistence and delivery resilience belong to the administrative caller.
async fn set_driver_status(
    State(app_state): State<Arc<AppState>>,
    Path(driver_id): Path<i64>,
    Json(update): Json<DriverStatusUpdate>,
) -> StatusCode {
    tracing::info!(driver_id, active = update.active, "Admin account status push");
    app_state
        .dispatcher
        .notify_account_status(driver_id, update.active);
    StatusCode::NO_CONTENT
}
