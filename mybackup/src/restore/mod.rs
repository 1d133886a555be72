//! Point-in-time restore of a cluster from another cluster's backups.
//!
//! One attempt walks [`RestorePhase`] from `AwaitingPodIp` to `Done`. When
//! the target accepts connections before the account's grants are visible
//! the attempt stops with `BadConnection`, and [`run_with_retry`] starts a
//! fresh attempt.

pub mod locate;

use chrono::{NaiveDateTime, Utc};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cluster::{update_status_with_retry, ClusterKey, ClusterStore, RestoreRecord};
use crate::config::Config;
use crate::operator::{Connector, DatabaseOperator, ServerStatus};
use crate::utils::{MyBackupError, RestoreStep, Result};
use crate::format_backup_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    AwaitingPodIp,
    AwaitingServerReady,
    LocatingBackup,
    Preparing,
    LoadingDump,
    LoadingBinlog,
    Finishing,
    Done,
    /// The privilege race was hit; the attempt must be restarted.
    Aborted,
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestorePhase::AwaitingPodIp => "awaiting pod ip",
            RestorePhase::AwaitingServerReady => "awaiting server ready",
            RestorePhase::LocatingBackup => "locating backup",
            RestorePhase::Preparing => "preparing",
            RestorePhase::LoadingDump => "loading dump",
            RestorePhase::LoadingBinlog => "loading binlog",
            RestorePhase::Finishing => "finishing",
            RestorePhase::Done => "done",
            RestorePhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// What to restore, from where, to when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub source: ClusterKey,
    pub target: ClusterKey,
    /// UTC
    pub point: NaiveDateTime,
}

pub struct RestoreManager<S, C> {
    store: S,
    connector: C,
    request: RestoreRequest,
    dump_root: PathBuf,
    poll_attempts: u32,
    poll_interval: Duration,
    cancel: CancellationToken,
    phase: RestorePhase,
}

impl<S: ClusterStore, C: Connector> RestoreManager<S, C> {
    pub fn new(
        store: S,
        connector: C,
        request: RestoreRequest,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            connector,
            request,
            dump_root: config.backup.dump_dir.clone(),
            poll_attempts: config.restore.poll_attempts,
            poll_interval: config.restore.poll_interval(),
            cancel,
            phase: RestorePhase::AwaitingPodIp,
        }
    }

    pub fn phase(&self) -> RestorePhase {
        self.phase
    }

    fn enter(&mut self, phase: RestorePhase) {
        debug!(target_cluster = %self.request.target, from = %self.phase, to = %phase, "restore phase");
        self.phase = phase;
    }

    /// Directory holding every dump of the source cluster.
    pub fn source_dir(&self) -> PathBuf {
        self.dump_root
            .join(&self.request.source.namespace)
            .join(&self.request.source.name)
    }

    /// Run one restore attempt.
    pub async fn run(&mut self) -> Result<RestoreRecord> {
        self.enter(RestorePhase::AwaitingPodIp);
        let pods = self.store.list_pods(&self.request.target).await?;
        let pod_name = pods
            .first()
            .map(|p| p.name.clone())
            .ok_or_else(|| MyBackupError::NoCandidate(format!("cluster {} has no pods", self.request.target)))?;

        info!(name = %pod_name, "waiting for a pod to become ready");
        let host = self.wait_for_pod_ip(&pod_name).await?;
        let op = self.connector.open(&host)?;

        self.enter(RestorePhase::AwaitingServerReady);
        info!(name = %pod_name, "waiting for the mysqld to become ready");
        if let Err(e) = self.wait_for_server(&op).await {
            if e.is_bad_connection() {
                self.enter(RestorePhase::Aborted);
            }
            return Err(e);
        }

        self.enter(RestorePhase::LocatingBackup);
        let plan = locate::resolve(&self.source_dir(), self.request.point)?;
        let point = self.request.point;
        let binlog_source = plan.binlog_source(point).cloned();
        info!(
            dump = %plan.dump.name,
            binlog = binlog_source.as_ref().map(|s| s.name.as_str()).unwrap_or(""),
            "restoring from a backup"
        );

        self.enter(RestorePhase::Preparing);
        op.prepare_restore()
            .await
            .map_err(|e| e.in_step(RestoreStep::Prepare))?;

        self.enter(RestorePhase::LoadingDump);
        op.load_dump(&plan.dump)
            .await
            .map_err(|e| e.in_step(RestoreStep::LoadDump))?;
        info!("loaded dump successfully");

        if let Some(successor) = &binlog_source {
            self.enter(RestorePhase::LoadingBinlog);
            op.load_binlog(successor, point)
                .await
                .map_err(|e| e.in_step(RestoreStep::LoadBinlog))?;
            info!("applied binlog successfully");
        }

        self.enter(RestorePhase::Finishing);
        op.finish_restore()
            .await
            .map_err(|e| e.in_step(RestoreStep::Finish))?;

        let record = RestoreRecord {
            source: self.request.source.clone(),
            restore_point: format_backup_time(&point),
            dump: plan.dump.name.clone(),
            binlog: binlog_source.map(|s| s.name),
            completed_at: Utc::now(),
        };
        update_status_with_retry(&self.store, &self.request.target, |state| {
            state.restore = Some(record.clone());
        })
        .await?;

        self.enter(RestorePhase::Done);
        info!(target_cluster = %self.request.target, point = %record.restore_point, "restore finished successfully");
        Ok(record)
    }

    /// Sleep one poll interval unless cancelled first.
    async fn pause(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MyBackupError::Cancelled),
            _ = tokio::time::sleep(self.poll_interval) => Ok(()),
        }
    }

    async fn wait_for_pod_ip(&self, pod_name: &str) -> Result<String> {
        for _ in 0..self.poll_attempts {
            match self.store.get_pod(&self.request.target, pod_name).await {
                Ok(pod) => {
                    if let Some(ip) = pod.address() {
                        return Ok(ip.to_string());
                    }
                }
                Err(e) => debug!(error = %e, pod = pod_name, "pod not readable yet"),
            }
            self.pause().await?;
        }

        Err(MyBackupError::Timeout(format!(
            "pod {} got no address after {} attempts",
            pod_name, self.poll_attempts
        )))
    }

    /// Wait until the server answers and reports super_read_only. A status
    /// failure after a successful ping is the privilege race.
    async fn wait_for_server(&self, op: &C::Operator) -> Result<ServerStatus> {
        for _ in 0..self.poll_attempts {
            match op.ping().await {
                Ok(()) => {
                    let status = match op.server_status().await {
                        Ok(status) => status,
                        Err(e) if e.is_cancelled() => return Err(e),
                        Err(e) => {
                            error!(error = %e, "failed to get server status");
                            return Err(MyBackupError::BadConnection);
                        }
                    };
                    if status.super_read_only {
                        return Ok(status);
                    }
                    debug!("server is not super_read_only yet");
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => debug!(error = %e, "ping failed"),
            }
            self.pause().await?;
        }

        Err(MyBackupError::Timeout(format!(
            "server did not become ready after {} attempts",
            self.poll_attempts
        )))
    }
}

/// Run `attempt` until it returns anything but `BadConnection`, at most
/// `max_attempts` times, sleeping `delay` in between.
pub async fn run_with_retry<T, F, Fut>(
    max_attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut n = 1;
    loop {
        match attempt(n).await {
            Err(e) if e.is_bad_connection() && n < max_attempts => {
                warn!(attempt = n, max_attempts, "restore attempt aborted, retrying");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(MyBackupError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                n += 1;
            }
            result => return result,
        }
    }
}

/// Restore with a fresh manager per attempt.
pub async fn restore<S, C>(
    store: &S,
    connector: &C,
    request: &RestoreRequest,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<RestoreRecord>
where
    S: ClusterStore + Clone,
    C: Connector + Clone,
{
    let span = info_span!(
        "restore",
        run_id = %Uuid::new_v4(),
        cluster = %request.target,
        source = %request.source
    );
    run_with_retry(
        config.restore.max_attempts,
        config.restore.retry_delay(),
        cancel,
        |attempt| {
            let mut manager =
                RestoreManager::new(store.clone(), connector.clone(), request.clone(), config, cancel.clone());
            async move {
                info!(attempt, "starting restore attempt");
                manager.run().await
            }
        },
    )
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryClusterStore;
    use crate::cluster::{ClusterState, Pod};
    use crate::operator::fake::{Call, FakeConnector};
    use crate::parse_backup_time;
    use std::fs;
    use tempfile::TempDir;

    const HOST: &str = "10.1.0.5";

    struct Fixture {
        _temp_dir: TempDir,
        store: MemoryClusterStore,
        connector: FakeConnector,
        config: Config,
        target: ClusterKey,
    }

    fn fixture(dumps: &[&str], ip: Option<&str>) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        for dump in dumps {
            fs::create_dir_all(temp_dir.path().join("src-ns/src/src-mysql-1").join(dump)).unwrap();
        }

        let target = ClusterKey::new("dst-ns", "dst");
        let store = MemoryClusterStore::new();
        store.insert_cluster(ClusterState::new(target.clone(), "8.0"));
        store.insert_pod(
            &target,
            Pod {
                name: "dst-mysql-0".into(),
                ip: ip.map(String::from),
                role: None,
            },
        );

        let connector = FakeConnector::new();
        connector.with(|s| {
            s.statuses.insert(
                HOST.into(),
                ServerStatus {
                    super_read_only: true,
                    ..Default::default()
                },
            );
        });

        let mut config = Config::default();
        config.backup.dump_dir = temp_dir.path().to_path_buf();
        config.restore.poll_attempts = 50;
        config.restore.poll_interval_ms = 1;
        config.restore.retry_delay_ms = 1;

        Fixture {
            _temp_dir: temp_dir,
            store,
            connector,
            config,
            target,
        }
    }

    fn request(point: &str) -> RestoreRequest {
        RestoreRequest {
            source: ClusterKey::new("src-ns", "src"),
            target: ClusterKey::new("dst-ns", "dst"),
            point: parse_backup_time(point).unwrap(),
        }
    }

    fn manager(f: &Fixture, point: &str) -> RestoreManager<MemoryClusterStore, FakeConnector> {
        RestoreManager::new(
            f.store.clone(),
            f.connector.clone(),
            request(point),
            &f.config,
            CancellationToken::new(),
        )
    }

    fn destructive(calls: &[Call]) -> Vec<Call> {
        calls.iter().filter(|c| c.is_destructive()).cloned().collect()
    }

    #[tokio::test]
    async fn test_restore_between_dumps_replays_successor_binlog() -> Result<()> {
        let f = fixture(&["20230101-000000", "20230102-000000", "20230103-000000"], Some(HOST));
        let mut m = manager(&f, "20230102-120000");

        let record = m.run().await?;
        assert_eq!(m.phase(), RestorePhase::Done);
        assert_eq!(record.dump, "20230102-000000");
        assert_eq!(record.binlog.as_deref(), Some("20230103-000000"));

        assert_eq!(
            destructive(&f.connector.calls()),
            vec![
                Call::PrepareRestore,
                Call::LoadDump("20230102-000000".into()),
                Call::LoadBinlog {
                    successor: "20230103-000000".into(),
                    stop_at: "20230102-120000".into(),
                },
                Call::FinishRestore,
            ]
        );

        let stored = f.store.cluster(&f.target).unwrap();
        assert_eq!(stored.restore, Some(record));
        Ok(())
    }

    #[tokio::test]
    async fn test_exact_point_skips_binlog() -> Result<()> {
        let f = fixture(&["20230101-000000", "20230102-000000", "20230103-000000"], Some(HOST));
        let record = manager(&f, "20230102-000000").run().await?;

        assert!(record.binlog.is_none());
        assert_eq!(f.connector.count(|c| matches!(c, Call::LoadBinlog { .. })), 0);
        assert_eq!(f.connector.count(|c| matches!(c, Call::FinishRestore)), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_backup_is_not_destructive() {
        let f = fixture(&[], Some(HOST));
        let err = manager(&f, "20230102-000000").run().await.unwrap_err();

        assert!(matches!(err, MyBackupError::NoBackupFound(_)));
        assert!(destructive(&f.connector.calls()).is_empty());
        assert!(f.store.cluster(&f.target).unwrap().restore.is_none());
    }

    #[tokio::test]
    async fn test_waits_for_super_read_only() -> Result<()> {
        let f = fixture(&["20230101-000000"], Some(HOST));
        f.connector.with(|s| {
            s.ping_results.push_back(Err(MyBackupError::Connectivity("refused".into())));
            s.status_results.push_back(Ok(ServerStatus::default()));
        });

        manager(&f, "20230101-000000").run().await?;
        assert_eq!(f.connector.count(|c| matches!(c, Call::Ping)), 3);
        assert_eq!(f.connector.count(|c| matches!(c, Call::ServerStatus)), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_failure_aborts_attempt() {
        let f = fixture(&["20230101-000000"], Some(HOST));
        f.connector.with(|s| {
            s.status_results
                .push_back(Err(MyBackupError::Query("Access denied".into())));
        });

        let mut m = manager(&f, "20230101-000000");
        let err = m.run().await.unwrap_err();
        assert!(err.is_bad_connection());
        assert_eq!(m.phase(), RestorePhase::Aborted);
        assert!(destructive(&f.connector.calls()).is_empty());
    }

    #[tokio::test]
    async fn test_retry_driver_restarts_after_bad_connection() -> Result<()> {
        let f = fixture(&["20230101-000000", "20230102-000000"], Some(HOST));
        f.connector.with(|s| {
            s.status_results
                .push_back(Err(MyBackupError::Query("Access denied".into())));
        });

        let cancel = CancellationToken::new();
        let record = restore(&f.store, &f.connector, &request("20230101-120000"), &f.config, &cancel).await?;

        assert_eq!(record.dump, "20230101-000000");
        assert_eq!(f.connector.count(|c| matches!(c, Call::Open(_))), 2);
        assert_eq!(f.connector.count(|c| matches!(c, Call::PrepareRestore)), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_driver_gives_up() {
        let f = fixture(&["20230101-000000"], Some(HOST));
        f.connector.with(|s| {
            for _ in 0..10 {
                s.status_results
                    .push_back(Err(MyBackupError::Query("Access denied".into())));
            }
        });

        let cancel = CancellationToken::new();
        let err = restore(&f.store, &f.connector, &request("20230101-000000"), &f.config, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_bad_connection());
        assert_eq!(
            f.connector.count(|c| matches!(c, Call::Open(_))),
            f.config.restore.max_attempts as usize
        );
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_pod_ip() {
        let mut f = fixture(&["20230101-000000"], None);
        f.config.restore.poll_attempts = 600;
        f.config.restore.poll_interval_ms = 1000;

        let cancel = CancellationToken::new();
        let mut m = RestoreManager::new(
            f.store.clone(),
            f.connector.clone(),
            request("20230101-000000"),
            &f.config,
            cancel.clone(),
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = m.run().await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(f.connector.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pod_ip_timeout() {
        let f = fixture(&["20230101-000000"], None);
        let err = manager(&f, "20230101-000000").run().await.unwrap_err();
        assert!(matches!(err, MyBackupError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_load_failure_names_step() {
        let f = fixture(&["20230101-000000"], Some(HOST));
        f.connector.with(|s| s.fail_load_dump = true);

        let err = manager(&f, "20230101-000000").run().await.unwrap_err();
        assert!(matches!(
            err,
            MyBackupError::RestoreStep {
                step: RestoreStep::LoadDump,
                ..
            }
        ));
        assert_eq!(f.connector.count(|c| matches!(c, Call::FinishRestore)), 0);
    }
}
