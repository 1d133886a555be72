use mybackup::Config;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub log_level: String,
    /// Settings handed to every backup and restore run
    pub core: Config,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut core = Config::default();
        if let Ok(path) = std::env::var("STATE_DB") {
            core.store.path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("DUMP_DIR") {
            core.backup.dump_dir = PathBuf::from(dir);
        }
        if let Some(threads) = env_parse("THREADS") {
            core.backup.threads = threads;
        }
        if let Ok(user) = std::env::var("MYSQL_USER") {
            core.mysql.user = user;
        }
        if let Some(port) = env_parse("MYSQL_PORT") {
            core.mysql.port = port;
        }
        if let Some(attempts) = env_parse("RESTORE_MAX_ATTEMPTS") {
            core.restore.max_attempts = attempts;
        }

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
        core.log.level = log_level.clone();

        Self {
            port: env_parse("PORT").unwrap_or(3000),
            log_level,
            core,
        }
    }
}
