pub mod backup_scheduler;
pub mod runner;
