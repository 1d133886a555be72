use crate::error::AppError;
use crate::services::backup_scheduler::BackupScheduler;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use mybackup::cluster::{BackupDescriptor, ClusterKey, ClusterState, ClusterStore, Pod, RestoreRecord};
use mybackup::parse_backup_time;
use mybackup::restore::RestoreRequest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_clusters))
        .route("/{namespace}/{name}", get(get_cluster).put(upsert_cluster))
        .route("/{namespace}/{name}/pods/{pod}", put(upsert_pod))
        .route("/{namespace}/{name}/backup", post(run_backup))
        .route("/{namespace}/{name}/restore", post(run_restore))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertClusterRequest {
    pub mysql_version: String,
    #[serde(default)]
    pub backup_schedule: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertPodRequest {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreClusterRequest {
    pub source_namespace: String,
    pub source_name: String,
    /// `YYYYMMDD-HHMMSS`, UTC
    pub restore_point: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    #[serde(flatten)]
    pub cluster: ClusterState,
    pub pods: Vec<Pod>,
    pub run_in_progress: bool,
}

async fn list_clusters(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ClusterState>>, AppError> {
    Ok(Json(state.store.list_clusters().await?))
}

async fn get_cluster(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ClusterView>, AppError> {
    let key = ClusterKey::new(namespace, name);
    let cluster = state.store.get_cluster(&key).await?;
    let pods = state.store.list_pods(&key).await?;
    Ok(Json(ClusterView {
        cluster,
        pods,
        run_in_progress: state.runner.is_running(&key),
    }))
}

async fn upsert_cluster(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(body): Json<UpsertClusterRequest>,
) -> Result<Json<ClusterState>, AppError> {
    if body.mysql_version.is_empty() {
        return Err(AppError::BadRequest("mysqlVersion is required".into()));
    }
    let schedule = body.backup_schedule.filter(|s| !s.trim().is_empty());
    if let Some(cron) = &schedule {
        BackupScheduler::check_cron(cron)?;
    }

    let key = ClusterKey::new(namespace, name);
    let cluster = state
        .store
        .upsert_cluster(&key, &body.mysql_version, schedule.clone())
        .await?;
    state.scheduler.schedule_cluster(&key, schedule.as_deref()).await?;

    Ok(Json(cluster))
}

async fn upsert_pod(
    State(state): State<Arc<AppState>>,
    Path((namespace, name, pod)): Path<(String, String, String)>,
    Json(body): Json<UpsertPodRequest>,
) -> Result<Json<Pod>, AppError> {
    let key = ClusterKey::new(namespace, name);
    let pod = Pod {
        name: pod,
        ip: body.ip.filter(|ip| !ip.is_empty()),
        role: body.role,
    };
    Ok(Json(state.store.upsert_pod(&key, pod).await?))
}

async fn run_backup(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<BackupDescriptor>, AppError> {
    let key = ClusterKey::new(namespace, name);
    Ok(Json(state.runner.run_backup(key).await?))
}

async fn run_restore(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(body): Json<RestoreClusterRequest>,
) -> Result<Json<RestoreRecord>, AppError> {
    let point = parse_backup_time(&body.restore_point).ok_or_else(|| {
        AppError::BadRequest(format!(
            "invalid restorePoint '{}': expected YYYYMMDD-HHMMSS",
            body.restore_point
        ))
    })?;

    let request = RestoreRequest {
        source: ClusterKey::new(body.source_namespace, body.source_name),
        target: ClusterKey::new(namespace, name),
        point,
    };
    Ok(Json(state.runner.run_restore(request).await?))
}
