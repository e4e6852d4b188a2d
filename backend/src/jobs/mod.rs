// Background jobs, scheduled with tokio-cron-scheduler.

pub mod scheduler;

pub use scheduler::{JobConfig, JobScheduler};
