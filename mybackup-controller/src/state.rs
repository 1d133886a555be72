use crate::services::backup_scheduler::BackupScheduler;
use crate::services::runner::Runner;
use mybackup::cluster::sqlite::SqliteClusterStore;
use std::sync::Arc;

pub struct AppState {
    pub store: SqliteClusterStore,
    pub runner: Runner,
    pub scheduler: Arc<BackupScheduler>,
}

impl AppState {
    pub fn new(runner: Runner, scheduler: Arc<BackupScheduler>) -> Self {
        Self {
            store: runner.store.clone(),
            runner,
            scheduler,
        }
    }
}
