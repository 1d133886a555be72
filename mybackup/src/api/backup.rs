//! Backup trigger endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::{ApiError, AppState, BackupRunner};
use crate::format_backup_time;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResponse {
    pub status: String,
    pub backup_name: String,
    pub date: String,
    pub warnings: Vec<String>,
}

/// POST /backup - Run one backup and answer when it has finished
pub async fn start_backup<R: BackupRunner>(
    State(state): State<AppState<R>>,
) -> Result<Json<BackupResponse>, ApiError> {
    let _permit = state.gate.clone().try_acquire_owned().map_err(|_| ApiError {
        status: StatusCode::CONFLICT,
        message: "a backup is already running".into(),
    })?;

    tracing::info!("Backup requested");
    let descriptor = state.runner.run_backup().await.map_err(|e| {
        tracing::error!("Backup failed: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(BackupResponse {
        status: "Successful".into(),
        backup_name: format_backup_time(&descriptor.time.naive_utc()),
        date: descriptor.time.to_rfc3339(),
        warnings: descriptor.warnings,
    }))
}
