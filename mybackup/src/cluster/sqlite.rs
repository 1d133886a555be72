//! SQLite-backed cluster state for standalone operation.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::info;

use super::{BackupDescriptor, ClusterKey, ClusterState, ClusterStore, Pod, RestoreRecord};
use crate::utils::{MyBackupError, Result};

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clusters (
  namespace TEXT NOT NULL,
  name TEXT NOT NULL,
  mysql_version TEXT NOT NULL DEFAULT '8.0',
  backup_schedule TEXT,
  backup TEXT,
  restore TEXT,
  resource_version INTEGER NOT NULL DEFAULT 1,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (namespace, name)
);

CREATE TABLE IF NOT EXISTS pods (
  namespace TEXT NOT NULL,
  cluster TEXT NOT NULL,
  name TEXT NOT NULL,
  ip TEXT,
  role TEXT,
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (namespace, cluster, name),
  FOREIGN KEY (namespace, cluster) REFERENCES clusters(namespace, name) ON DELETE CASCADE
);
"#;

pub fn create_pool(db_path: &Path) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = Pool::builder().max_size(4).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = DELETE;
         PRAGMA synchronous = FULL;",
    )?;

    Ok(pool)
}

pub fn migrate(pool: &DbPool) -> Result<()> {
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Databases created before schedules existed
    if !has_column(&conn, "clusters", "backup_schedule")? {
        conn.execute_batch("ALTER TABLE clusters ADD COLUMN backup_schedule TEXT")?;
    }

    info!("[DB] Migration completed successfully");
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns.iter().any(|c| c == column))
}

/// Raw `clusters` row; JSON columns are decoded outside the row callback.
struct ClusterRow {
    namespace: String,
    name: String,
    mysql_version: String,
    backup_schedule: Option<String>,
    backup: Option<String>,
    restore: Option<String>,
    resource_version: i64,
}

fn row_to_cluster(row: &Row) -> rusqlite::Result<ClusterRow> {
    Ok(ClusterRow {
        namespace: row.get("namespace")?,
        name: row.get("name")?,
        mysql_version: row.get("mysql_version")?,
        backup_schedule: row.get("backup_schedule")?,
        backup: row.get("backup")?,
        restore: row.get("restore")?,
        resource_version: row.get("resource_version")?,
    })
}

impl TryFrom<ClusterRow> for ClusterState {
    type Error = MyBackupError;

    fn try_from(row: ClusterRow) -> Result<Self> {
        let backup = row
            .backup
            .as_deref()
            .map(serde_json::from_str::<BackupDescriptor>)
            .transpose()?;
        let restore = row
            .restore
            .as_deref()
            .map(serde_json::from_str::<RestoreRecord>)
            .transpose()?;

        Ok(ClusterState {
            key: ClusterKey::new(row.namespace, row.name),
            mysql_version: row.mysql_version,
            backup_schedule: row.backup_schedule,
            backup,
            restore,
            resource_version: row.resource_version,
        })
    }
}

fn row_to_pod(row: &Row) -> rusqlite::Result<Pod> {
    Ok(Pod {
        name: row.get("name")?,
        ip: row.get("ip")?,
        role: row.get("role")?,
    })
}

fn find_cluster(conn: &Connection, key: &ClusterKey) -> Result<Option<ClusterState>> {
    let row = conn
        .query_row(
            "SELECT * FROM clusters WHERE namespace = ?1 AND name = ?2",
            params![key.namespace, key.name],
            row_to_cluster,
        )
        .optional()?;
    row.map(ClusterState::try_from).transpose()
}

fn require_cluster(conn: &Connection, key: &ClusterKey) -> Result<ClusterState> {
    find_cluster(conn, key)?
        .ok_or_else(|| MyBackupError::NotFound(format!("cluster {} not found", key)))
}

#[derive(Clone)]
pub struct SqliteClusterStore {
    pool: DbPool,
}

impl SqliteClusterStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let pool = create_pool(path)?;
        migrate(&pool)?;
        Ok(Self { pool })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }

    /// Register a cluster or change its settings. Status fields are kept.
    pub async fn upsert_cluster(
        &self,
        key: &ClusterKey,
        mysql_version: &str,
        backup_schedule: Option<String>,
    ) -> Result<ClusterState> {
        let key = key.clone();
        let mysql_version = mysql_version.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO clusters (namespace, name, mysql_version, backup_schedule)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(namespace, name) DO UPDATE SET
                   mysql_version = excluded.mysql_version,
                   backup_schedule = excluded.backup_schedule,
                   resource_version = resource_version + 1,
                   updated_at = datetime('now')",
                params![key.namespace, key.name, mysql_version, backup_schedule],
            )?;
            require_cluster(conn, &key)
        })
        .await
    }

    /// Register a pod or update its address and role.
    pub async fn upsert_pod(&self, key: &ClusterKey, pod: Pod) -> Result<Pod> {
        let key = key.clone();
        self.blocking(move |conn| {
            require_cluster(conn, &key)?;
            conn.execute(
                "INSERT INTO pods (namespace, cluster, name, ip, role)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(namespace, cluster, name) DO UPDATE SET
                   ip = excluded.ip,
                   role = excluded.role,
                   updated_at = datetime('now')",
                params![key.namespace, key.name, pod.name, pod.ip, pod.role],
            )?;
            Ok(pod)
        })
        .await
    }

    pub async fn list_clusters(&self) -> Result<Vec<ClusterState>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM clusters ORDER BY namespace, name")?;
            let rows = stmt
                .query_map([], row_to_cluster)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(ClusterState::try_from).collect()
        })
        .await
    }
}

impl ClusterStore for SqliteClusterStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<ClusterState> {
        let key = key.clone();
        self.blocking(move |conn| require_cluster(conn, &key)).await
    }

    async fn update_status(&self, state: &ClusterState) -> Result<ClusterState> {
        let state = state.clone();
        self.blocking(move |conn| {
            let backup = state.backup.as_ref().map(serde_json::to_string).transpose()?;
            let restore = state.restore.as_ref().map(serde_json::to_string).transpose()?;

            let changed = conn.execute(
                "UPDATE clusters SET
                   backup = ?1,
                   restore = ?2,
                   resource_version = resource_version + 1,
                   updated_at = datetime('now')
                 WHERE namespace = ?3 AND name = ?4 AND resource_version = ?5",
                params![backup, restore, state.key.namespace, state.key.name, state.resource_version],
            )?;

            if changed == 0 {
                let current = require_cluster(conn, &state.key)?;
                return Err(MyBackupError::Conflict(format!(
                    "cluster {} was modified: version {} is stale, current is {}",
                    state.key, state.resource_version, current.resource_version
                )));
            }

            require_cluster(conn, &state.key)
        })
        .await
    }

    async fn list_pods(&self, key: &ClusterKey) -> Result<Vec<Pod>> {
        let key = key.clone();
        self.blocking(move |conn| {
            require_cluster(conn, &key)?;
            let mut stmt = conn.prepare(
                "SELECT name, ip, role FROM pods WHERE namespace = ?1 AND cluster = ?2 ORDER BY rowid",
            )?;
            let pods = stmt
                .query_map(params![key.namespace, key.name], row_to_pod)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(pods)
        })
        .await
    }

    async fn get_pod(&self, key: &ClusterKey, name: &str) -> Result<Pod> {
        let key = key.clone();
        let name = name.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT name, ip, role FROM pods WHERE namespace = ?1 AND cluster = ?2 AND name = ?3",
                params![key.namespace, key.name, name],
                row_to_pod,
            )
            .optional()?
            .ok_or_else(|| MyBackupError::NotFound(format!("pod {} of {} not found", name, key)))
        })
        .await
    }
}
