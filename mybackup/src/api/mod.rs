//! HTTP trigger surface of the backup sidecar.
//!
//! At most one backup runs at a time; a request arriving while one is in
//! flight is rejected with 409 instead of queueing a second dump against
//! the same instance.

pub mod backup;
pub mod health;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use crate::backup::BackupManager;
use crate::cluster::{BackupDescriptor, ClusterStore};
use crate::operator::Connector;
use crate::utils::{MyBackupError, Result};

/// Something that can run one backup of the sidecar's cluster.
pub trait BackupRunner: Send + Sync + 'static {
    fn run_backup(&self) -> impl Future<Output = Result<BackupDescriptor>> + Send;
}

impl<S, C> BackupRunner for BackupManager<S, C>
where
    S: ClusterStore + 'static,
    C: Connector + 'static,
{
    async fn run_backup(&self) -> Result<BackupDescriptor> {
        self.run().await
    }
}

/// Shared application state
pub struct AppState<R> {
    pub runner: Arc<R>,
    /// One permit: held for the duration of a backup
    pub gate: Arc<Semaphore>,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            gate: self.gate.clone(),
        }
    }
}

pub fn create_app_state<R: BackupRunner>(runner: R) -> AppState<R> {
    AppState {
        runner: Arc::new(runner),
        gate: Arc::new(Semaphore::new(1)),
    }
}

/// Create the API router with all endpoints
pub fn create_router<R: BackupRunner>(state: AppState<R>) -> Router {
    Router::new()
        .route("/health", get(health::health::<R>))
        .route("/version", get(health::version))
        .route("/backup", post(backup::start_backup::<R>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body returned by the sidecar
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl From<MyBackupError> for ApiError {
    fn from(err: MyBackupError) -> Self {
        let status = match &err {
            MyBackupError::Conflict(_) => StatusCode::CONFLICT,
            MyBackupError::NoCandidate(_) | MyBackupError::NoBackupFound(_) | MyBackupError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            MyBackupError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
