// Job Scheduler - daily overdue and reminder sweeps

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::services::reminders::{run_reminder_sweep, PgReminderStore};
use crate::services::{EmailService, EventDispatcher, InvoiceService};

pub const OVERDUE_JOB: &str = "Overdue Sweep";
pub const REMINDER_JOB: &str = "Reminder Sweep";

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub overdue_cron: String,
    pub reminder_cron: String,
}

impl JobConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            overdue_cron: config.overdue_cron.clone(),
            reminder_cron: config.reminder_cron.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: JobStatus,
    pub items_processed: usize,
    pub errors: usize,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
    PartialFailure,
}

/// Outcome counts of a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobRun {
    pub processed: usize,
    pub errors: usize,
}

/// Everything a job run needs; cheap to clone into each cron tick.
#[derive(Clone)]
struct JobContext {
    db_pool: PgPool,
    email: EmailService,
    events: EventDispatcher,
    logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

async fn run_overdue(ctx: JobContext) -> JobResult<JobRun> {
    let today = Utc::now().date_naive();
    let report = InvoiceService::new(ctx.db_pool, ctx.events)
        .mark_overdue(today, None)
        .await
        .map_err(|e| JobError::ExecutionError(e.message()))?;
    Ok(JobRun {
        processed: report.marked,
        errors: 0,
    })
}

async fn run_reminders(ctx: JobContext) -> JobResult<JobRun> {
    let today = Utc::now().date_naive();
    let store = PgReminderStore::new(ctx.db_pool);
    let report = run_reminder_sweep(&store, &ctx.email, today).await?;
    Ok(JobRun {
        processed: report.sent,
        errors: report.errors,
    })
}

async fn record_log(logs: &RwLock<Vec<JobExecutionLog>>, entry: JobExecutionLog) {
    let mut logs = logs.write().await;
    logs.push(entry);
    if logs.len() > MAX_EXECUTION_LOGS {
        logs.remove(0);
    }
}

/// Run one job to completion, logging the outcome either way.
async fn execute<F, Fut>(name: &'static str, ctx: JobContext, run: F)
where
    F: FnOnce(JobContext) -> Fut,
    Fut: Future<Output = JobResult<JobRun>>,
{
    let started_at = Utc::now();
    info!("Running {} job", name);
    let logs = ctx.logs.clone();

    let (status, outcome) = match run(ctx).await {
        Ok(outcome) => {
            info!("{} completed: {} processed, {} errors", name, outcome.processed, outcome.errors);
            let status = if outcome.errors == 0 {
                JobStatus::Completed
            } else {
                JobStatus::PartialFailure
            };
            (status, outcome)
        }
        Err(e) => {
            error!("{} failed: {}", name, e);
            (JobStatus::Failed, JobRun { processed: 0, errors: 1 })
        }
    };

    let completed_at = Utc::now();
    record_log(
        &logs,
        JobExecutionLog {
            id: Uuid::new_v4(),
            job_name: name.to_string(),
            started_at,
            completed_at,
            status,
            items_processed: outcome.processed,
            errors: outcome.errors,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        },
    )
    .await;
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    ctx: JobContext,
    config: JobConfig,
}

impl JobScheduler {
    pub async fn new(
        db_pool: PgPool,
        email: EmailService,
        events: EventDispatcher,
        config: JobConfig,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            ctx: JobContext {
                db_pool,
                email,
                events,
                logs: Arc::new(RwLock::new(Vec::new())),
            },
            config,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_overdue_sweep().await?;
        self.schedule_reminder_sweep().await?;
        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;

        let logs = self.execution_logs().await;
        let failed = logs.iter().filter(|l| l.status == JobStatus::Failed).count();
        info!("Scheduler ran {} jobs this session ({} failed)", logs.len(), failed);
        Ok(())
    }

    /// Most recent runs, oldest first.
    pub async fn execution_logs(&self) -> Vec<JobExecutionLog> {
        self.ctx.logs.read().await.clone()
    }

    async fn schedule_overdue_sweep(&self) -> JobResult<()> {
        let ctx = self.ctx.clone();
        let job = Job::new_async(self.config.overdue_cron.as_str(), move |_uuid, _lock| {
            let ctx = ctx.clone();
            Box::pin(async move { execute(OVERDUE_JOB, ctx, run_overdue).await })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled {} with cron '{}'", OVERDUE_JOB, self.config.overdue_cron);
        Ok(())
    }

    async fn schedule_reminder_sweep(&self) -> JobResult<()> {
        let ctx = self.ctx.clone();
        let job = Job::new_async(self.config.reminder_cron.as_str(), move |_uuid, _lock| {
            let ctx = ctx.clone();
            Box::pin(async move { execute(REMINDER_JOB, ctx, run_reminders).await })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled {} with cron '{}'", REMINDER_JOB, self.config.reminder_cron);
        Ok(())
    }
}
