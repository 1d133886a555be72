//! In-memory `ClusterStore` with injectable write conflicts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{ClusterKey, ClusterState, ClusterStore, Pod};
use crate::utils::{MyBackupError, Result};

#[derive(Default)]
struct Inner {
    clusters: HashMap<ClusterKey, ClusterState>,
    pods: HashMap<ClusterKey, Vec<Pod>>,
    pending_conflicts: u32,
    updates: u32,
}

#[derive(Clone, Default)]
pub struct MemoryClusterStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_cluster(&self, state: ClusterState) {
        let mut inner = self.inner.lock().unwrap();
        inner.pods.entry(state.key.clone()).or_default();
        inner.clusters.insert(state.key.clone(), state);
    }

    pub fn insert_pod(&self, key: &ClusterKey, pod: Pod) {
        let mut inner = self.inner.lock().unwrap();
        let pods = inner.pods.entry(key.clone()).or_default();
        match pods.iter_mut().find(|p| p.name == pod.name) {
            Some(existing) => *existing = pod,
            None => pods.push(pod),
        }
    }

    /// Fail the next `n` status updates with `Conflict`.
    pub fn inject_conflicts(&self, n: u32) {
        self.inner.lock().unwrap().pending_conflicts = n;
    }

    /// Successful status updates so far.
    pub fn updates(&self) -> u32 {
        self.inner.lock().unwrap().updates
    }

    pub fn cluster(&self, key: &ClusterKey) -> Option<ClusterState> {
        self.inner.lock().unwrap().clusters.get(key).cloned()
    }
}

impl ClusterStore for MemoryClusterStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<ClusterState> {
        self.cluster(key)
            .ok_or_else(|| MyBackupError::NotFound(format!("cluster {} not found", key)))
    }

    async fn update_status(&self, state: &ClusterState) -> Result<ClusterState> {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending_conflicts > 0 {
            inner.pending_conflicts -= 1;
            return Err(MyBackupError::Conflict(format!("cluster {} was modified", state.key)));
        }

        let current = inner
            .clusters
            .get_mut(&state.key)
            .ok_or_else(|| MyBackupError::NotFound(format!("cluster {} not found", state.key)))?;
        if current.resource_version != state.resource_version {
            return Err(MyBackupError::Conflict(format!("cluster {} was modified", state.key)));
        }

        current.backup = state.backup.clone();
        current.restore = state.restore.clone();
        current.resource_version += 1;
        let stored = current.clone();
        inner.updates += 1;
        Ok(stored)
    }

    async fn list_pods(&self, key: &ClusterKey) -> Result<Vec<Pod>> {
        let inner = self.inner.lock().unwrap();
        inner
            .pods
            .get(key)
            .cloned()
            .ok_or_else(|| MyBackupError::NotFound(format!("cluster {} not found", key)))
    }

    async fn get_pod(&self, key: &ClusterKey, name: &str) -> Result<Pod> {
        let inner = self.inner.lock().unwrap();
        inner
            .pods
            .get(key)
            .and_then(|pods| pods.iter().find(|p| p.name == name).cloned())
            .ok_or_else(|| MyBackupError::NotFound(format!("pod {} of {} not found", name, key)))
    }
}
