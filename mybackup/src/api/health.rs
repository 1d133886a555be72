//! Health check endpoints.

use axum::extract::State;
use axum::{response::IntoResponse, Json};
use serde_json::json;
use std::sync::OnceLock;
use std::time::Instant;

use super::{AppState, BackupRunner};

static START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// GET /health - Health check endpoint
pub async fn health<R: BackupRunner>(State(state): State<AppState<R>>) -> impl IntoResponse {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime,
        "backup_in_progress": state.gate.available_permits() == 0,
    }))
}

/// GET /version - Version information endpoint
pub async fn version() -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "tools": ["mysqlsh", "mysqlbinlog", "mysql"],
    }))
}
