//! Full-cluster backup runs.
//!
//! A run picks a source pod, dumps it into
//! `<dump_dir>/<namespace>/<cluster>/<pod>/<YYYYMMDD-HHMMSS>`, captures the
//! binlogs written since the previous run into the dump's `binlog/`
//! subdirectory and replaces the cluster's backup descriptor.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::binlog::{self, BINLOG_DIR};
use crate::cluster::{
    update_status_with_retry, BackupDescriptor, ClusterKey, ClusterStore, Pod, ROLE_FOLLOWER, ROLE_LEADER,
};
use crate::config::BackupConfig;
use crate::fs::{dir_usage, metadata};
use crate::operator::{Connector, DatabaseOperator};
use crate::utils::{Diagnosed, MyBackupError, Result};
use crate::format_backup_time;

/// Pick the pod to dump: the first addressable FOLLOWER, else the first
/// addressable LEADER.
pub fn select_source(pods: &[Pod]) -> Result<&Pod> {
    if pods.is_empty() {
        return Err(MyBackupError::NoCandidate("the cluster has no pods".into()));
    }

    let addressable = || pods.iter().filter(|p| p.address().is_some());
    addressable()
        .find(|p| p.has_role(ROLE_FOLLOWER))
        .or_else(|| addressable().find(|p| p.has_role(ROLE_LEADER)))
        .ok_or_else(|| {
            MyBackupError::NoCandidate(format!(
                "none of {} pods is an addressable {} or {}",
                pods.len(),
                ROLE_FOLLOWER,
                ROLE_LEADER
            ))
        })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Usage {
    dump: u64,
    total: u64,
}

/// Sizes of the new dump and of the whole backup root. Failures are warnings.
async fn measure_usage(root: PathBuf, dump_dir: PathBuf) -> Diagnosed<Usage> {
    let measured = tokio::task::spawn_blocking(move || {
        let mut report = Diagnosed::new(Usage::default());
        match dir_usage(&root) {
            Ok(bytes) => report.value.total = bytes,
            Err(e) => {
                error!(error = %e, dir = %root.display(), "failed to get current backup dir usage");
                report.warn(format!("failed to get backup dir usage: {}", e));
            }
        }
        match dir_usage(&dump_dir) {
            Ok(bytes) => report.value.dump = bytes,
            Err(e) => {
                error!(error = %e, dir = %dump_dir.display(), "failed to get backup dir usage");
                report.warn(format!("failed to get backup dir usage: {}", e));
            }
        }
        report
    })
    .await;

    measured.unwrap_or_else(|e| {
        let mut report = Diagnosed::new(Usage::default());
        report.warn(format!("failed to get backup dir usage: {}", e));
        report
    })
}

pub struct BackupManager<S, C> {
    store: S,
    connector: C,
    key: ClusterKey,
    dump_root: PathBuf,
}

impl<S: ClusterStore, C: Connector> BackupManager<S, C> {
    pub fn new(store: S, connector: C, key: ClusterKey, config: &BackupConfig) -> Self {
        Self {
            store,
            connector,
            key,
            dump_root: config.dump_dir.clone(),
        }
    }

    /// Directory holding every dump of this cluster.
    pub fn cluster_dir(&self) -> PathBuf {
        self.dump_root.join(&self.key.namespace).join(&self.key.name)
    }

    /// Run one backup and persist its descriptor.
    pub async fn run(&self) -> Result<BackupDescriptor> {
        let span = info_span!("backup", run_id = %Uuid::new_v4(), cluster = %self.key);
        self.run_once().instrument(span).await
    }

    async fn run_once(&self) -> Result<BackupDescriptor> {
        let cluster = self.store.get_cluster(&self.key).await?;
        let pods = self.store.list_pods(&self.key).await?;
        let source = select_source(&pods)?;
        let host = source
            .address()
            .ok_or_else(|| MyBackupError::NoCandidate(format!("pod {} has no address", source.name)))?;

        let op = self.connector.open(host)?;
        let status = op.server_status().await?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let backup_name = format_backup_time(&started_at.naive_utc());
        let dump_dir = self.cluster_dir().join(&source.name).join(&backup_name);

        info!(
            cluster = %self.key,
            source = %source.name,
            time = %backup_name,
            uuid = %status.server_uuid,
            binlog = %status.binlog_file,
            "chosen source"
        );

        let gtid_set = self.full_backup(&op, &dump_dir).await?;

        let mut report = Diagnosed::new(());
        if let Some(prev) = cluster.backup.as_ref().filter(|b| b.has_time()) {
            let captured = self
                .capture_binlogs(&op, &cluster.mysql_version, prev, &source.name, &dump_dir)
                .await?;
            report.absorb(captured);
        }

        let elapsed = clock.elapsed();
        let usage = report.absorb(measure_usage(self.dump_root.clone(), dump_dir.clone()).await);

        let descriptor = BackupDescriptor {
            time: started_at,
            elapsed,
            source_pod: source.name.clone(),
            source_uuid: status.server_uuid,
            binlog_filename: status.binlog_file,
            gtid_set,
            last_backup_size: usage.dump,
            backup_dir_used_size: usage.total,
            warnings: report.warnings,
        };

        update_status_with_retry(&self.store, &self.key, |state| {
            state.backup = Some(descriptor.clone());
        })
        .await?;

        if descriptor.warnings.is_empty() {
            info!(cluster = %self.key, elapsed = ?descriptor.elapsed, "backup finished successfully");
        } else {
            warn!(
                cluster = %self.key,
                warnings = descriptor.warnings.len(),
                "backup finished with warnings"
            );
        }
        Ok(descriptor)
    }

    /// Dump the source and return the executed GTID set recorded in the dump.
    async fn full_backup(&self, op: &C::Operator, dump_dir: &Path) -> Result<String> {
        tokio::fs::create_dir_all(dump_dir).await?;
        op.full_backup(dump_dir).await?;

        let gtid = metadata::gtid_executed(dump_dir)?;
        let usage = dir_usage(dump_dir)?;
        info!(bytes = usage, "full dump");
        Ok(gtid)
    }

    /// Capture binlogs since the previous run. Only cancellation is an error;
    /// any other failure ends up as a single warning.
    async fn capture_binlogs(
        &self,
        op: &C::Operator,
        mysql_version: &str,
        prev: &BackupDescriptor,
        source: &str,
        dump_dir: &Path,
    ) -> Result<Diagnosed<()>> {
        let mut report = Diagnosed::new(());
        match self.try_capture_binlogs(op, mysql_version, prev, source, dump_dir).await {
            Ok(bytes) => info!(bytes, "binlog backup usage"),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                error!(error = %e, "failed to backup binary logs");
                report.warn(format!("failed to backup binary logs: {}", e));
            }
        }
        Ok(report)
    }

    async fn try_capture_binlogs(
        &self,
        op: &C::Operator,
        mysql_version: &str,
        prev: &BackupDescriptor,
        source: &str,
        dump_dir: &Path,
    ) -> Result<u64> {
        let binlog_dir = dump_dir.join(BINLOG_DIR);
        tokio::fs::create_dir_all(&binlog_dir).await?;

        // A different source has its own binlog numbering.
        let start = if source != prev.source_pod {
            let binlogs = op.list_binlogs(mysql_version).await?;
            binlog::earliest(&binlogs)
                .ok_or_else(|| MyBackupError::NotFound("no binlog files found".into()))?
        } else {
            prev.binlog_filename.clone()
        };

        op.binlog_backup(&binlog_dir, &start, &prev.gtid_set).await?;
        Ok(dir_usage(&binlog_dir)?)
    }
}
