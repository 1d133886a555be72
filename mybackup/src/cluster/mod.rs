//! Cluster state as seen by the backup and restore managers.
//!
//! The managers read pods and the persisted backup descriptor through
//! [`ClusterStore`] and write status back with compare-and-swap on
//! `resource_version`, retried by [`retry::retry_on_conflict`].

#[cfg(test)]
pub mod memory;
pub mod retry;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::utils::Result;
use retry::{retry_on_conflict, DEFAULT_RETRY};

pub const ROLE_LEADER: &str = "LEADER";
pub const ROLE_FOLLOWER: &str = "FOLLOWER";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A database node of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    /// Unset until the pod has been scheduled and given an address
    #[serde(default)]
    pub ip: Option<String>,
    /// Replication role label, `LEADER` or `FOLLOWER`
    #[serde(default)]
    pub role: Option<String>,
}

impl Pod {
    pub fn address(&self) -> Option<&str> {
        self.ip.as_deref().filter(|ip| !ip.is_empty())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }
}

/// The outcome of the latest successful backup run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDescriptor {
    pub time: DateTime<Utc>,
    pub elapsed: Duration,
    pub source_pod: String,
    #[serde(rename = "sourceUUID")]
    pub source_uuid: String,
    pub binlog_filename: String,
    pub gtid_set: String,
    pub last_backup_size: u64,
    pub backup_dir_used_size: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl BackupDescriptor {
    /// Whether the descriptor records an actual run, not a zero value.
    pub fn has_time(&self) -> bool {
        self.time != DateTime::<Utc>::default()
    }
}

/// The restore most recently applied to a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRecord {
    pub source: ClusterKey,
    pub restore_point: String,
    pub dump: String,
    #[serde(default)]
    pub binlog: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    pub key: ClusterKey,
    pub mysql_version: String,
    /// Cron expression driving scheduled backups, if any
    #[serde(default)]
    pub backup_schedule: Option<String>,
    #[serde(default)]
    pub backup: Option<BackupDescriptor>,
    #[serde(default)]
    pub restore: Option<RestoreRecord>,
    pub resource_version: i64,
}

impl ClusterState {
    pub fn new(key: ClusterKey, mysql_version: impl Into<String>) -> Self {
        Self {
            key,
            mysql_version: mysql_version.into(),
            backup_schedule: None,
            backup: None,
            restore: None,
            resource_version: 1,
        }
    }
}

/// Access to persisted cluster state.
pub trait ClusterStore: Send + Sync {
    /// `NotFound` when the cluster is unknown.
    fn get_cluster(&self, key: &ClusterKey) -> impl Future<Output = Result<ClusterState>> + Send;

    /// Write `backup` and `restore` of `state` if its `resource_version` is
    /// still current, returning the stored state with the bumped version.
    /// `Conflict` when another writer got there first.
    fn update_status(&self, state: &ClusterState) -> impl Future<Output = Result<ClusterState>> + Send;

    /// Pods in node-list order.
    fn list_pods(&self, key: &ClusterKey) -> impl Future<Output = Result<Vec<Pod>>> + Send;

    fn get_pod(&self, key: &ClusterKey, name: &str) -> impl Future<Output = Result<Pod>> + Send;
}

/// Read-modify-write of a cluster's status, retried on conflict.
pub async fn update_status_with_retry<S, F>(store: &S, key: &ClusterKey, apply: F) -> Result<ClusterState>
where
    S: ClusterStore,
    F: Fn(&mut ClusterState) + Sync,
{
    let apply = &apply;
    retry_on_conflict(&DEFAULT_RETRY, move || async move {
        let mut state = store.get_cluster(key).await?;
        apply(&mut state);
        store.update_status(&state).await
    })
    .await
}
