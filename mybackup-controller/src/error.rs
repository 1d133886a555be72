use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mybackup::MyBackupError;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<MyBackupError> for AppError {
    fn from(err: MyBackupError) -> Self {
        match err {
            MyBackupError::NotFound(_) | MyBackupError::NoCandidate(_) | MyBackupError::NoBackupFound(_) => {
                AppError::NotFound(err.to_string())
            }
            MyBackupError::Conflict(_) => AppError::Conflict(err.to_string()),
            MyBackupError::Config(_) => AppError::BadRequest(err.to_string()),
            MyBackupError::Cancelled => AppError::ServiceUnavailable("server is shutting down".into()),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            AppError::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
