//! Cron scheduler for the named background jobs.
//!
//! Each job has a six-field cron expression evaluated in the configured
//! time zone. A ticker checks for due jobs at a fixed interval and runs them
//! to completion one at a time; fires missed while a job was running or
//! paused collapse into a single run.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::{RwLock, watch};

use crate::error::{ConfigError, JobError};
use crate::job::DailyJob;

pub const DAILY_FACTS: &str = "daily_facts";
pub const RETENTION_CLEANUP: &str = "retention_cleanup";
/// Sundays at 02:00.
pub const RETENTION_CRON: &str = "0 0 2 * * Sun";

/// Work performed when a job fires. `today` is the local date in the
/// scheduler's time zone.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn run(&self, today: NaiveDate) -> Result<String, JobError>;
}

/// Produce and broadcast the daily fact.
pub struct DailyFactsTask(pub Arc<DailyJob>);

#[async_trait]
impl ScheduledTask for DailyFactsTask {
    async fn run(&self, today: NaiveDate) -> Result<String, JobError> {
        let summary = self.0.produce_and_send(today).await?;
        Ok(format!(
            "'{}' sent to {}/{} recipients",
            summary.title, summary.succeeded, summary.attempted
        ))
    }
}

/// Purge old artifacts.
pub struct RetentionTask(pub Arc<DailyJob>);

#[async_trait]
impl ScheduledTask for RetentionTask {
    async fn run(&self, today: NaiveDate) -> Result<String, JobError> {
        let deleted = self.0.cleanup(today).await?;
        Ok(format!("deleted {deleted} artifacts"))
    }
}

/// Outcome of the most recent run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastRun {
    pub at: DateTime<Utc>,
    pub success: bool,
    pub detail: String,
}

/// Snapshot of a job for the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
    pub paused: bool,
    pub running: bool,
    pub last_run: Option<LastRun>,
}

#[derive(Debug, Default)]
struct JobState {
    paused: bool,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<LastRun>,
}

struct ScheduledJob {
    name: String,
    expression: String,
    schedule: cron::Schedule,
    task: Arc<dyn ScheduledTask>,
    running: AtomicBool,
    state: RwLock<JobState>,
}

/// Clears the running flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    timezone: Tz,
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            jobs: Vec::new(),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Register a job. The expression uses six fields (seconds first).
    pub fn add_job(
        &mut self,
        name: &str,
        expression: &str,
        task: Arc<dyn ScheduledTask>,
    ) -> Result<(), ConfigError> {
        let schedule = cron::Schedule::from_str(expression).map_err(|e| ConfigError::InvalidValue {
            key: format!("schedule for {name}"),
            message: format!("invalid cron '{expression}': {e}"),
        })?;
        let next_run = self.next_after(&schedule, Utc::now());
        self.jobs.push(ScheduledJob {
            name: name.to_string(),
            expression: expression.to_string(),
            schedule,
            task,
            running: AtomicBool::new(false),
            state: RwLock::new(JobState {
                next_run,
                ..Default::default()
            }),
        });
        tracing::info!(job = name, schedule = expression, next_run = ?next_run, "Job scheduled");
        Ok(())
    }

    fn next_after(&self, schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    fn find(&self, name: &str) -> Result<&ScheduledJob, JobError> {
        self.jobs
            .iter()
            .find(|j| j.name == name)
            .ok_or_else(|| JobError::UnknownJob { name: name.to_string() })
    }

    async fn info(&self, job: &ScheduledJob) -> JobInfo {
        let state = job.state.read().await;
        JobInfo {
            name: job.name.clone(),
            schedule: job.expression.clone(),
            next_run: state.next_run,
            paused: state.paused,
            running: job.running.load(Ordering::SeqCst),
            last_run: state.last_run.clone(),
        }
    }

    pub async fn list(&self) -> Vec<JobInfo> {
        let mut infos = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            infos.push(self.info(job).await);
        }
        infos
    }

    pub async fn get(&self, name: &str) -> Result<JobInfo, JobError> {
        let job = self.find(name)?;
        Ok(self.info(job).await)
    }

    pub async fn pause(&self, name: &str) -> Result<JobInfo, JobError> {
        let job = self.find(name)?;
        job.state.write().await.paused = true;
        tracing::info!(job = name, "Job paused");
        Ok(self.info(job).await)
    }

    /// Resume a paused job. Fires missed while paused are skipped.
    pub async fn resume(&self, name: &str) -> Result<JobInfo, JobError> {
        let job = self.find(name)?;
        {
            let mut state = job.state.write().await;
            state.paused = false;
            state.next_run = self.next_after(&job.schedule, Utc::now());
        }
        tracing::info!(job = name, "Job resumed");
        Ok(self.info(job).await)
    }

    /// Run a job immediately, outside its schedule.
    pub async fn run_now(&self, name: &str) -> Result<String, JobError> {
        let job = self.find(name)?;
        self.execute(job, Utc::now()).await
    }

    /// Whether any job is currently executing.
    pub fn is_busy(&self) -> bool {
        self.jobs.iter().any(|j| j.running.load(Ordering::SeqCst))
    }

    /// Run every unpaused job whose next fire time is at or before `now`.
    /// Returns the names of jobs that ran.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut fired = Vec::new();
        for job in &self.jobs {
            let due = {
                let state = job.state.read().await;
                !state.paused && state.next_run.is_some_and(|next| next <= now)
            };
            if !due {
                continue;
            }

            // Outcome is logged and recorded by execute.
            let _ = self.execute(job, now).await;
            // Schedule from the later of the tick time and completion time so
            // fires missed during a long run collapse into one.
            let after = now.max(Utc::now());
            job.state.write().await.next_run = self.next_after(&job.schedule, after);
            fired.push(job.name.clone());
        }
        fired
    }

    async fn execute(&self, job: &ScheduledJob, now: DateTime<Utc>) -> Result<String, JobError> {
        if job
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(job = %job.name, "Job already running, skipping");
            return Err(JobError::AlreadyRunning {
                name: job.name.clone(),
            });
        }
        let _guard = RunGuard(&job.running);

        let today = now.with_timezone(&self.timezone).date_naive();
        tracing::info!(job = %job.name, date = %today, "Job started");
        let started = std::time::Instant::now();
        let result = job.task.run(today).await;

        let last_run = match &result {
            Ok(detail) => {
                tracing::info!(job = %job.name, elapsed_ms = started.elapsed().as_millis() as u64, detail = %detail, "Job finished");
                LastRun {
                    at: now,
                    success: true,
                    detail: detail.clone(),
                }
            }
            Err(e) => {
                tracing::error!(job = %job.name, error = %e, "Job failed");
                LastRun {
                    at: now,
                    success: false,
                    detail: e.to_string(),
                }
            }
        };
        job.state.write().await.last_run = Some(last_run);
        result
    }
}

/// Spawn the background loop that fires due jobs every `interval` until
/// `shutdown` flips to `true`. A run in progress is finished first.
pub fn spawn_ticker(
    scheduler: Arc<Scheduler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    scheduler.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Scheduler stopped");
    })
}
