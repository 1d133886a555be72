//! `DatabaseOperator` backed by sqlx and the MySQL command-line utilities.

use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Connection, Row};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::command::{self, ToolCommand};
use super::{ConnectionParams, Connector, DatabaseOperator, ServerFamily, ServerStatus, INTERNAL_USERS};
use crate::binlog;
use crate::config::MysqlConfig;
use crate::fs::DumpCandidate;
use crate::utils::{MyBackupError, Result};
use crate::BACKUP_TIME_FORMAT;

/// Session against one instance, scoped to a single run.
pub struct MysqlOperator {
    params: ConnectionParams,
    pool: MySqlPool,
    read_timeout: Duration,
    threads: usize,
    /// Writable directory handed to mysqlsh as `$HOME`
    work_dir: PathBuf,
    cancel: CancellationToken,
}

impl MysqlOperator {
    /// Set up the session. The connection is opened lazily on first use.
    pub fn new(
        params: ConnectionParams,
        mysql: &MysqlConfig,
        threads: usize,
        work_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.user)
            .password(&params.password);

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(mysql.connect_timeout())
            .idle_timeout(Some(mysql.idle_timeout()))
            .connect_lazy_with(options);

        Self {
            params,
            pool,
            read_timeout: mysql.read_timeout(),
            threads,
            work_dir,
            cancel,
        }
    }

    /// Bound a statement by the read timeout and the run's cancellation.
    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            result = tokio::time::timeout(self.read_timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(MyBackupError::Connectivity(format!(
                    "{} on {} timed out after {:?}",
                    what, self.params.host, self.read_timeout
                ))),
            },
            _ = self.cancel.cancelled() => Err(MyBackupError::Cancelled),
        }
    }

    async fn execute_all(&self, statements: &[&str]) -> Result<()> {
        for &statement in statements {
            debug!(host = %self.params.host, statement, "executing");
            self.bounded(statement, async {
                sqlx::query(statement).execute(&self.pool).await?;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    fn uri(&self) -> String {
        format!("mysql://{}@{}:{}", self.params.user, self.params.host, self.params.port)
    }

    fn mysqlsh(&self) -> ToolCommand {
        ToolCommand::new("mysqlsh")
            .arg(self.uri())
            .args(["--passwords-from-stdin", "--save-passwords=never", "-C", "False", "--", "util"])
            .env("HOME", self.work_dir.to_string_lossy())
            .stdin(self.params.password.clone())
    }

    fn full_backup_command(&self, target_dir: &Path) -> ToolCommand {
        self.mysqlsh().args([
            "dump-instance".to_string(),
            target_dir.to_string_lossy().into_owned(),
            format!("--excludeUsers={}", INTERNAL_USERS.join(",")),
            format!("--threads={}", self.threads),
        ])
    }

    fn binlog_backup_command(&self, target_dir: &Path, binlog: &str, exclude_gtids: &str) -> ToolCommand {
        ToolCommand::new("mysqlbinlog").args([
            "-h".to_string(),
            self.params.host.clone(),
            "--port".to_string(),
            self.params.port.to_string(),
            "--protocol=tcp".to_string(),
            "-u".to_string(),
            self.params.user.clone(),
            format!("-p{}", self.params.password),
            "--get-server-public-key".to_string(),
            "--read-from-remote-master=BINLOG-DUMP-GTIDS".to_string(),
            format!("--exclude-gtids={}", exclude_gtids),
            "-t".to_string(),
            "--raw".to_string(),
            format!("--result-file={}/", target_dir.to_string_lossy()),
            binlog.to_string(),
        ])
    }

    fn load_dump_command(&self, dump: &DumpCandidate) -> ToolCommand {
        self.mysqlsh().args([
            "load-dump".to_string(),
            dump.path.to_string_lossy().into_owned(),
            "--loadUsers=true".to_string(),
            "--skipBinlog=true".to_string(),
            "--updateGtidSet=replace".to_string(),
            "--ignoreVersion=true".to_string(),
            format!("--threads={}", self.threads),
        ])
    }

    fn replay_commands(&self, files: &[PathBuf], stop_at: NaiveDateTime) -> (ToolCommand, ToolCommand) {
        let extract = ToolCommand::new("mysqlbinlog")
            .env("TZ", "UTC")
            .arg(format!("--stop-datetime={}", stop_at.format("%Y-%m-%d %H:%M:%S")))
            .args(files.iter().map(|f| f.to_string_lossy().into_owned()));

        let apply = ToolCommand::new("mysql")
            .args([
                "-h".to_string(),
                self.params.host.clone(),
                "--port".to_string(),
                self.params.port.to_string(),
                "--protocol=tcp".to_string(),
                "-u".to_string(),
                self.params.user.clone(),
                "--binary-mode".to_string(),
            ])
            .env("MYSQL_PWD", self.params.password.clone());

        (extract, apply)
    }
}

fn binlog_files(successor: &DumpCandidate) -> Result<Vec<PathBuf>> {
    let dir = successor.path.join(binlog::BINLOG_DIR);
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    if names.is_empty() {
        return Err(MyBackupError::NotFound(format!(
            "no binlog files in {}",
            dir.display()
        )));
    }

    Ok(binlog::sort_by_sequence(names)
        .into_iter()
        .map(|name| dir.join(name))
        .collect())
}

fn column_names(row: &MySqlRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// `SHOW BINARY LOGS` must have exactly the columns of `family`.
fn check_binlog_columns(family: ServerFamily, columns: &[String]) -> Result<()> {
    let expected = family.binlog_columns();
    if columns.iter().map(String::as_str).ne(expected.iter().copied()) {
        return Err(MyBackupError::SchemaMismatch(format!(
            "SHOW BINARY LOGS returned {:?}, expected {:?} for {:?}",
            columns, expected, family
        )));
    }
    Ok(())
}

impl DatabaseOperator for MysqlOperator {
    async fn ping(&self) -> Result<()> {
        self.bounded("ping", async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await?;
            Ok(())
        })
        .await
    }

    async fn server_status(&self) -> Result<ServerStatus> {
        let master = self
            .bounded("SHOW MASTER STATUS", async {
                Ok(sqlx::query("SHOW MASTER STATUS")
                    .fetch_optional(&self.pool)
                    .await?)
            })
            .await?;

        let mut status = ServerStatus::default();
        if let Some(row) = master {
            status.binlog_file = row.try_get::<String, _>("File")?;
            // Multi-source sets are wrapped over several lines.
            status.executed_gtid_set = row
                .try_get::<String, _>("Executed_Gtid_Set")?
                .replace('\n', "");
        }

        let (super_read_only, server_uuid) = self
            .bounded("server variables", async {
                Ok(sqlx::query_as::<_, (i64, String)>(
                    "SELECT CAST(@@super_read_only AS SIGNED), CAST(@@server_uuid AS CHAR)",
                )
                .fetch_one(&self.pool)
                .await?)
            })
            .await?;

        status.super_read_only = super_read_only != 0;
        status.server_uuid = server_uuid;
        Ok(status)
    }

    async fn full_backup(&self, target_dir: &Path) -> Result<()> {
        info!(host = %self.params.host, dir = %target_dir.display(), "starting full dump");
        command::run(&self.full_backup_command(target_dir), &self.cancel).await
    }

    async fn list_binlogs(&self, version_hint: &str) -> Result<Vec<String>> {
        let family = ServerFamily::from_version_hint(version_hint);
        let rows = self
            .bounded("SHOW BINARY LOGS", async {
                Ok(sqlx::query("SHOW BINARY LOGS").fetch_all(&self.pool).await?)
            })
            .await?;

        let mut names = Vec::with_capacity(rows.len());
        for row in &rows {
            check_binlog_columns(family, &column_names(row))?;
            names.push(row.try_get::<String, _>("Log_name")?);
        }
        Ok(names)
    }

    async fn binlog_backup(&self, target_dir: &Path, binlog: &str, exclude_gtids: &str) -> Result<()> {
        info!(host = %self.params.host, binlog, dir = %target_dir.display(), "capturing binlogs");
        let cmd = self.binlog_backup_command(target_dir, binlog, exclude_gtids);
        command::run(&cmd, &self.cancel).await
    }

    async fn prepare_restore(&self) -> Result<()> {
        self.execute_all(&[
            "SET GLOBAL offline_mode = ON",
            "SET GLOBAL super_read_only = OFF",
            "SET GLOBAL local_infile = ON",
        ])
        .await
    }

    async fn load_dump(&self, dump: &DumpCandidate) -> Result<()> {
        info!(host = %self.params.host, dump = %dump.name, "loading dump");
        command::run(&self.load_dump_command(dump), &self.cancel).await
    }

    async fn load_binlog(&self, successor: &DumpCandidate, stop_at: NaiveDateTime) -> Result<()> {
        let files = binlog_files(successor)?;
        info!(
            host = %self.params.host,
            binlogs = files.len(),
            stop_at = %stop_at.format(BACKUP_TIME_FORMAT),
            "replaying binlogs"
        );
        let (extract, apply) = self.replay_commands(&files, stop_at);
        command::run_pipeline(&extract, &apply, &self.cancel).await
    }

    async fn finish_restore(&self) -> Result<()> {
        self.execute_all(&[
            "SET GLOBAL local_infile = OFF",
            "SET GLOBAL super_read_only = ON",
            "SET GLOBAL offline_mode = OFF",
        ])
        .await
    }
}

/// Opens [`MysqlOperator`]s with fixed credentials and settings.
#[derive(Clone)]
pub struct MysqlConnector {
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mysql: MysqlConfig,
    pub threads: usize,
    pub work_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl Connector for MysqlConnector {
    type Operator = MysqlOperator;

    fn open(&self, host: &str) -> Result<MysqlOperator> {
        if host.is_empty() {
            return Err(MyBackupError::Connectivity("empty host".into()));
        }
        let params = ConnectionParams {
            host: host.to_string(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        };
        Ok(MysqlOperator::new(
            params,
            &self.mysql,
            self.threads,
            self.work_dir.clone(),
            self.cancel.clone(),
        ))
    }
}
