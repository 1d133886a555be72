use crate::error::AppError;
use crate::services::runner::Runner;
use dashmap::DashMap;
use mybackup::cluster::ClusterKey;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Cron-driven backups, one job per cluster with a `backup_schedule`.
///
/// Expressions use the six-field form with a leading seconds column,
/// e.g. `0 0 2 * * *` for 02:00 every day.
pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    runner: Runner,
    jobs: DashMap<String, Uuid>,
}

impl BackupScheduler {
    pub async fn new(runner: Runner) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            runner,
            jobs: DashMap::new(),
        })
    }

    /// Reject expressions the scheduler cannot parse.
    pub fn check_cron(cron_expression: &str) -> Result<(), AppError> {
        Job::new_async(cron_expression, |_uuid, _lock| Box::pin(async {}))
            .map(|_| ())
            .map_err(|e| AppError::Unprocessable(format!("invalid cron expression '{}': {}", cron_expression, e)))
    }

    fn backup_job(&self, key: &ClusterKey, cron_expression: &str) -> anyhow::Result<Job> {
        let runner = self.runner.clone();
        let key = key.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let runner = runner.clone();
            let key = key.clone();
            Box::pin(async move {
                if runner.is_running(&key) {
                    tracing::warn!(cluster = %key, "Skipping scheduled backup: a run is already in progress");
                    return;
                }

                tracing::info!(cluster = %key, "Starting scheduled backup");
                match runner.run_backup(key.clone()).await {
                    Ok(_) => {}
                    Err(AppError::Conflict(_)) => {
                        tracing::warn!(cluster = %key, "Skipping scheduled backup: a run is already in progress");
                    }
                    Err(e) => tracing::error!(cluster = %key, error = %e, "Scheduled backup failed"),
                }
            })
        })?;
        Ok(job)
    }

    /// Replace the job of `key` with one for `cron_expression`; `None` or an
    /// empty expression only removes it.
    pub async fn schedule_cluster(&self, key: &ClusterKey, cron_expression: Option<&str>) -> anyhow::Result<()> {
        let job = match cron_expression.filter(|c| !c.is_empty()) {
            Some(cron) => Some((self.backup_job(key, cron)?, cron)),
            None => None,
        };

        let scheduler = self.scheduler.lock().await;
        if let Some((_, old)) = self.jobs.remove(&key.to_string()) {
            scheduler.remove(&old).await?;
            tracing::info!(cluster = %key, "Backup schedule removed");
        }

        if let Some((job, cron)) = job {
            let id = scheduler.add(job).await?;
            self.jobs.insert(key.to_string(), id);
            tracing::info!(cluster = %key, cron = %cron, "Backup scheduled");
        }
        Ok(())
    }

    pub fn is_scheduled(&self, key: &ClusterKey) -> bool {
        self.jobs.contains_key(&key.to_string())
    }

    pub async fn init_schedules(&self) -> anyhow::Result<()> {
        let clusters = self.runner.store.list_clusters().await?;

        let mut count = 0;
        for cluster in clusters {
            let Some(cron) = cluster.backup_schedule.as_deref().filter(|c| !c.is_empty()) else {
                continue;
            };
            if let Err(e) = self.schedule_cluster(&cluster.key, Some(cron)).await {
                tracing::error!(cluster = %cluster.key, cron = %cron, error = %e, "Failed to schedule backup");
            } else {
                count += 1;
            }
        }

        tracing::info!(count, "Cron schedules initialized");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
