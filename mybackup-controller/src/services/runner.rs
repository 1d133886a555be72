use crate::error::AppError;
use dashmap::DashSet;
use mybackup::backup::BackupManager;
use mybackup::cluster::sqlite::SqliteClusterStore;
use mybackup::cluster::{BackupDescriptor, ClusterKey, RestoreRecord};
use mybackup::operator::MysqlConnector;
use mybackup::restore::{self, RestoreRequest};
use mybackup::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs backups and restores against registered clusters, one at a time per cluster.
#[derive(Clone)]
pub struct Runner {
    pub store: SqliteClusterStore,
    pub connector: MysqlConnector,
    pub config: Config,
    pub cancel: CancellationToken,
    running: Arc<DashSet<String>>,
}

/// Marks a cluster busy until dropped.
pub struct RunGuard {
    running: Arc<DashSet<String>>,
    key: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.remove(&self.key);
    }
}

impl Runner {
    pub fn new(
        store: SqliteClusterStore,
        connector: MysqlConnector,
        config: Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            connector,
            config,
            cancel,
            running: Arc::new(DashSet::new()),
        }
    }

    pub fn is_running(&self, key: &ClusterKey) -> bool {
        self.running.contains(&key.to_string())
    }

    /// Claim `key`, or `None` when a run already holds it.
    pub fn claim(&self, key: &ClusterKey) -> Option<RunGuard> {
        let key = key.to_string();
        if !self.running.insert(key.clone()) {
            return None;
        }
        Some(RunGuard {
            running: self.running.clone(),
            key,
        })
    }

    fn claim_or_conflict(&self, key: &ClusterKey) -> Result<RunGuard, AppError> {
        self.claim(key)
            .ok_or_else(|| AppError::Conflict(format!("{} already has a run in progress", key)))
    }

    pub async fn run_backup(&self, key: ClusterKey) -> Result<BackupDescriptor, AppError> {
        let _guard = self.claim_or_conflict(&key)?;

        tracing::info!(cluster = %key, "Starting backup");
        let manager = BackupManager::new(self.store.clone(), self.connector.clone(), key.clone(), &self.config.backup);
        let descriptor = manager.run().await.map_err(|e| {
            tracing::error!(cluster = %key, error = %e, "Backup failed");
            AppError::from(e)
        })?;

        tracing::info!(
            cluster = %key,
            source_pod = %descriptor.source_pod,
            warnings = descriptor.warnings.len(),
            "Backup finished"
        );
        Ok(descriptor)
    }

    /// Restore `request.target`; the target is claimed for the whole retry loop.
    pub async fn run_restore(&self, request: RestoreRequest) -> Result<RestoreRecord, AppError> {
        let _guard = self.claim_or_conflict(&request.target)?;

        tracing::info!(cluster = %request.target, source = %request.source, "Starting restore");
        let record = restore::restore(&self.store, &self.connector, &request, &self.config, &self.cancel)
            .await
            .map_err(|e| {
                tracing::error!(cluster = %request.target, error = %e, "Restore failed");
                AppError::from(e)
            })?;

        tracing::info!(cluster = %request.target, dump = %record.dump, "Restore finished");
        Ok(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn test_runner(dir: &TempDir) -> Runner {
        let mut config = Config::default();
        config.store.path = dir.path().join("state.db");
        config.backup.dump_dir = dir.path().join("dumps");
        let cancel = CancellationToken::new();
        let store = SqliteClusterStore::open(&config.store.path).unwrap();
        let connector = MysqlConnector {
            port: config.mysql.port,
            user: "root".into(),
            password: "secret".into(),
            mysql: config.mysql.clone(),
            threads: 1,
            work_dir: config.backup.dump_dir.clone(),
            cancel: cancel.clone(),
        };
        Runner::new(store, connector, config, cancel)
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let runner = test_runner(&dir);
        let key = ClusterKey::new("default", "sample");

        let guard = runner.claim(&key).unwrap();
        assert!(runner.is_running(&key));
        assert!(runner.claim(&key).is_none());
        assert!(runner.claim(&ClusterKey::new("default", "other")).is_some());

        drop(guard);
        assert!(!runner.is_running(&key));
        assert!(runner.claim(&key).is_some());
    }

    #[tokio::test]
    async fn test_backup_refused_while_running() {
        let dir = TempDir::new().unwrap();
        let runner = test_runner(&dir);
        let key = ClusterKey::new("default", "sample");
        runner.store.upsert_cluster(&key, "8.0.25", None).await.unwrap();

        let _guard = runner.claim(&key).unwrap();
        let err = runner.run_backup(key.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_backup_without_pods_is_not_found_and_releases_claim() {
        let dir = TempDir::new().unwrap();
        let runner = test_runner(&dir);
        let key = ClusterKey::new("default", "sample");
        runner.store.upsert_cluster(&key, "8.0.25", None).await.unwrap();

        let err = runner.run_backup(key.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(!runner.is_running(&key));
    }
}
