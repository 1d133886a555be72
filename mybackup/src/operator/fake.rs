//! In-memory `DatabaseOperator` for manager tests.

use chrono::NaiveDateTime;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Connector, DatabaseOperator, ServerStatus};
use crate::fs::metadata::DUMP_METADATA_FILE;
use crate::fs::DumpCandidate;
use crate::utils::{MyBackupError, Result};
use crate::format_backup_time;

/// One recorded call, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(String),
    Ping,
    ServerStatus,
    FullBackup(String),
    ListBinlogs(String),
    BinlogBackup { binlog: String, exclude_gtids: String },
    PrepareRestore,
    LoadDump(String),
    LoadBinlog { successor: String, stop_at: String },
    FinishRestore,
}

impl Call {
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Call::PrepareRestore | Call::LoadDump(_) | Call::LoadBinlog { .. } | Call::FinishRestore
        )
    }
}

#[derive(Default)]
pub struct FakeState {
    pub calls: Vec<Call>,
    /// Status per host; hosts not listed get `ServerStatus::default()`
    pub statuses: HashMap<String, ServerStatus>,
    /// Scripted outcomes of successive `ping` calls; empty means success
    pub ping_results: VecDeque<Result<()>>,
    /// Scripted outcomes of successive `server_status` calls
    pub status_results: VecDeque<Result<ServerStatus>>,
    pub binlogs: Vec<String>,
    pub gtid_executed: String,
    pub fail_binlog_backup: bool,
    pub fail_full_backup: bool,
    pub fail_load_dump: bool,
}

/// Connector handing out operators that share one [`FakeState`].
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub state: Arc<Mutex<FakeState>>,
}

pub struct FakeOperator {
    host: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(c)).count())
    }
}

impl Connector for FakeConnector {
    type Operator = FakeOperator;

    fn open(&self, host: &str) -> Result<FakeOperator> {
        self.with(|s| s.calls.push(Call::Open(host.to_string())));
        Ok(FakeOperator {
            host: host.to_string(),
            state: self.state.clone(),
        })
    }
}

impl FakeOperator {
    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl DatabaseOperator for FakeOperator {
    async fn ping(&self) -> Result<()> {
        self.record(Call::Ping);
        self.state
            .lock()
            .unwrap()
            .ping_results
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn server_status(&self) -> Result<ServerStatus> {
        self.record(Call::ServerStatus);
        let mut state = self.state.lock().unwrap();
        if let Some(result) = state.status_results.pop_front() {
            return result;
        }
        Ok(state.statuses.get(&self.host).cloned().unwrap_or_default())
    }

    async fn full_backup(&self, target_dir: &Path) -> Result<()> {
        self.record(Call::FullBackup(target_dir.to_string_lossy().into_owned()));
        let (fail, gtid) = {
            let state = self.state.lock().unwrap();
            (state.fail_full_backup, state.gtid_executed.clone())
        };
        if fail {
            return Err(MyBackupError::tool("mysqlsh", "exited with exit status: 1"));
        }
        std::fs::create_dir_all(target_dir)?;
        std::fs::write(target_dir.join("data.tsv"), vec![b'x'; 4096])?;
        std::fs::write(
            target_dir.join(DUMP_METADATA_FILE),
            serde_json::json!({ "gtidExecuted": gtid }).to_string(),
        )?;
        Ok(())
    }

    async fn list_binlogs(&self, version_hint: &str) -> Result<Vec<String>> {
        self.record(Call::ListBinlogs(version_hint.to_string()));
        Ok(self.state.lock().unwrap().binlogs.clone())
    }

    async fn binlog_backup(&self, target_dir: &Path, binlog: &str, exclude_gtids: &str) -> Result<()> {
        self.record(Call::BinlogBackup {
            binlog: binlog.to_string(),
            exclude_gtids: exclude_gtids.to_string(),
        });
        if self.state.lock().unwrap().fail_binlog_backup {
            return Err(MyBackupError::tool("mysqlbinlog", "exited with exit status: 1"));
        }
        std::fs::create_dir_all(target_dir)?;
        std::fs::write(target_dir.join(binlog), b"binlog")?;
        Ok(())
    }

    async fn prepare_restore(&self) -> Result<()> {
        self.record(Call::PrepareRestore);
        Ok(())
    }

    async fn load_dump(&self, dump: &DumpCandidate) -> Result<()> {
        self.record(Call::LoadDump(dump.name.clone()));
        if self.state.lock().unwrap().fail_load_dump {
            return Err(MyBackupError::tool("mysqlsh", "exited with exit status: 1"));
        }
        Ok(())
    }

    async fn load_binlog(&self, successor: &DumpCandidate, stop_at: NaiveDateTime) -> Result<()> {
        self.record(Call::LoadBinlog {
            successor: successor.name.clone(),
            stop_at: format_backup_time(&stop_at),
        });
        Ok(())
    }

    async fn finish_restore(&self) -> Result<()> {
        self.record(Call::FinishRestore);
        Ok(())
    }
}
