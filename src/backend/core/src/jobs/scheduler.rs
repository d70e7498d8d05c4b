//! Explicit interval scheduler.
//!
//! Registrations are driven by [`JobScheduler::tick`] with an injected `now`;
//! [`JobScheduler::run`] feeds it the wall clock on a fixed tick until shutdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::{Job, JobContext, JobError, JobId, JobPriority, JobRun, JobStatus};

/// Interval-based schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntervalSchedule {
    /// Duration between executions
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Whether to run at the first tick instead of one interval later
    pub run_immediately: bool,
}

impl IntervalSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            run_immediately: false,
        }
    }

    pub fn with_immediate(mut self) -> Self {
        self.run_immediately = true;
        self
    }
}

/// A job that has been scheduled.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    /// Unique identifier
    pub id: JobId,
    /// The job name
    pub job_name: &'static str,
    pub schedule: IntervalSchedule,
    /// Priority among jobs due in the same tick
    pub priority: JobPriority,
    /// Whether this schedule is active
    pub active: bool,
    /// Next scheduled execution time
    pub next_run: DateTime<Utc>,
    /// Last execution time
    pub last_run: Option<DateTime<Utc>>,
    /// Outcome of the last execution
    pub last_status: Option<JobStatus>,
    /// Number of times this schedule has executed
    pub run_count: u64,
}

struct Registration {
    entry: ScheduledJob,
    job: Arc<dyn Job>,
}

/// Job scheduler managing recurring jobs.
pub struct JobScheduler {
    registrations: Arc<RwLock<Vec<Registration>>>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    /// Create a new job scheduler.
    pub fn new() -> Self {
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Self {
            registrations: Arc::new(RwLock::new(Vec::new())),
            shutdown,
        }
    }

    /// Schedule a job at fixed intervals, starting from `now`.
    pub async fn schedule_interval(
        &self,
        job: Arc<dyn Job>,
        schedule: IntervalSchedule,
        now: DateTime<Utc>,
    ) -> JobId {
        let id = JobId::new();
        let next_run = if schedule.run_immediately {
            now
        } else {
            advance(now, schedule.interval)
        };
        let entry = ScheduledJob {
            id,
            job_name: job.name(),
            schedule,
            priority: job.priority(),
            active: true,
            next_run,
            last_run: None,
            last_status: None,
            run_count: 0,
        };

        info!(job_id = %id, job = entry.job_name, next_run = %next_run, "Job scheduled");
        self.registrations
            .write()
            .await
            .push(Registration { entry, job });
        id
    }

    /// Cancel a scheduled job.
    pub async fn cancel(&self, id: JobId) -> bool {
        let mut registrations = self.registrations.write().await;
        if let Some(registration) = registrations.iter_mut().find(|r| r.entry.id == id) {
            registration.entry.active = false;
            registration.entry.last_status = Some(JobStatus::Cancelled);
            true
        } else {
            false
        }
    }

    /// List all active schedules.
    pub async fn list(&self) -> Vec<ScheduledJob> {
        self.registrations
            .read()
            .await
            .iter()
            .filter(|r| r.entry.active)
            .map(|r| r.entry.clone())
            .collect()
    }

    /// Run every active job due at `now`, highest priority first.
    ///
    /// Returns the bookkeeping of each run. The lock is not held while jobs run.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<JobRun> {
        let mut due: Vec<(JobId, JobPriority, Arc<dyn Job>)> = self
            .registrations
            .read()
            .await
            .iter()
            .filter(|r| r.entry.active && r.entry.next_run <= now)
            .map(|r| (r.entry.id, r.entry.priority, Arc::clone(&r.job)))
            .collect();
        due.sort_by(|a, b| b.1.cmp(&a.1));

        let mut runs = Vec::with_capacity(due.len());
        for (id, priority, job) in due {
            let run = self.execute(id, priority, job.as_ref(), now).await;

            let mut registrations = self.registrations.write().await;
            if let Some(registration) = registrations.iter_mut().find(|r| r.entry.id == id) {
                let entry = &mut registration.entry;
                entry.last_run = Some(now);
                entry.last_status = Some(run.status);
                entry.run_count += 1;
                entry.next_run = advance(now, entry.schedule.interval);
            }
            runs.push(run);
        }
        runs
    }

    async fn execute(
        &self,
        id: JobId,
        priority: JobPriority,
        job: &dyn Job,
        now: DateTime<Utc>,
    ) -> JobRun {
        let policy = job.retry_policy();
        let run = JobRun::new(id, job.name(), priority, now);
        let mut ctx = JobContext::new(run, self.shutdown.subscribe());
        let mut retries = 0;

        loop {
            ctx.run.start_attempt();
            let outcome = match job.timeout() {
                Some(limit) => tokio::time::timeout(limit, job.execute(&ctx))
                    .await
                    .unwrap_or_else(|_| {
                        Err(JobError::retryable(format!("Job timed out after {:?}", limit))
                            .with_code("Timeout"))
                    }),
                None => job.execute(&ctx).await,
            };

            match outcome {
                Ok(()) => {
                    ctx.run.complete();
                    info!(
                        job_id = %id,
                        job = job.name(),
                        attempts = ctx.run.attempts,
                        "Job completed"
                    );
                    break;
                }
                Err(err) if !ctx.is_cancelled() && policy.should_retry(retries, &err) => {
                    let delay = policy.backoff.delay(retries);
                    ctx.run.fail(&err, true);
                    warn!(
                        job_id = %id,
                        job = job.name(),
                        attempt = ctx.run.attempts,
                        error = %err,
                        retry_in = ?delay,
                        "Job attempt failed, retrying"
                    );
                    retries += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    ctx.run.fail(&err, false);
                    error!(
                        job_id = %id,
                        job = job.name(),
                        attempts = ctx.run.attempts,
                        error = %err,
                        "Job failed"
                    );
                    break;
                }
            }
        }

        ctx.run
    }

    /// Drive [`tick`](Self::tick) with the wall clock until [`shutdown`](Self::shutdown).
    pub async fn run(&self, tick_interval: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick = ?tick_interval, "Scheduler started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Shutdown the scheduler.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

fn advance(from: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    from + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BackoffStrategy, JobResult, RetryPolicy};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with the given error, then succeeds.
    struct FlakyJob {
        failures: u32,
        fatal: bool,
        calls: AtomicU32,
        seen: Mutex<Vec<DateTime<Utc>>>,
    }

    impl FlakyJob {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                fatal: false,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn fatal() -> Self {
            Self {
                fatal: true,
                ..Self::new(u32::MAX)
            }
        }
    }

    #[async_trait]
    impl Job for FlakyJob {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn execute(&self, ctx: &JobContext) -> JobResult {
            self.seen.lock().push(ctx.now());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.fatal {
                    return Err(JobError::fatal("broken"));
                }
                return Err(JobError::retryable("flaky"));
            }
            Ok(())
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::with_retries(2).with_backoff(BackoffStrategy::fixed(Duration::ZERO))
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_schedule_interval() {
        let scheduler = JobScheduler::new();
        let id = scheduler
            .schedule_interval(
                Arc::new(FlakyJob::new(0)),
                IntervalSchedule::new(Duration::from_secs(60)),
                at(0),
            )
            .await;

        let jobs = scheduler.list().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert_eq!(jobs[0].next_run, at(60));
    }

    #[tokio::test]
    async fn test_cancel_schedule() {
        let scheduler = JobScheduler::new();
        let id = scheduler
            .schedule_interval(
                Arc::new(FlakyJob::new(0)),
                IntervalSchedule::new(Duration::from_secs(60)),
                at(0),
            )
            .await;

        assert!(scheduler.cancel(id).await);
        assert!(!scheduler.cancel(JobId::new()).await);
        assert!(scheduler.list().await.is_empty());
        assert!(scheduler.tick(at(120)).await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_runs_only_due_jobs_with_injected_now() {
        let scheduler = JobScheduler::new();
        let job = Arc::new(FlakyJob::new(0));
        scheduler
            .schedule_interval(job.clone(), IntervalSchedule::new(Duration::from_secs(60)), at(0))
            .await;

        assert!(scheduler.tick(at(59)).await.is_empty());

        let runs = scheduler.tick(at(60)).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, JobStatus::Completed);
        assert_eq!(*job.seen.lock(), vec![at(60)]);

        let entry = &scheduler.list().await[0];
        assert_eq!(entry.run_count, 1);
        assert_eq!(entry.last_run, Some(at(60)));
        assert_eq!(entry.next_run, at(120));
    }

    #[tokio::test]
    async fn test_run_immediately() {
        let scheduler = JobScheduler::new();
        scheduler
            .schedule_interval(
                Arc::new(FlakyJob::new(0)),
                IntervalSchedule::new(Duration::from_secs(60)).with_immediate(),
                at(0),
            )
            .await;

        assert_eq!(scheduler.tick(at(0)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried() {
        let scheduler = JobScheduler::new();
        let job = Arc::new(FlakyJob::new(2));
        scheduler
            .schedule_interval(
                job.clone(),
                IntervalSchedule::new(Duration::from_secs(1)).with_immediate(),
                at(0),
            )
            .await;

        let runs = scheduler.tick(at(0)).await;
        assert_eq!(runs[0].status, JobStatus::Completed);
        assert_eq!(runs[0].attempts, 3);
        assert_eq!(job.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let scheduler = JobScheduler::new();
        let job = Arc::new(FlakyJob::new(10));
        scheduler
            .schedule_interval(
                job.clone(),
                IntervalSchedule::new(Duration::from_secs(1)).with_immediate(),
                at(0),
            )
            .await;

        let runs = scheduler.tick(at(0)).await;
        assert_eq!(runs[0].status, JobStatus::Dead);
        assert_eq!(runs[0].last_error.as_deref(), Some("flaky"));
        assert_eq!(job.calls.load(Ordering::SeqCst), 3);

        // A dead run does not unschedule the job.
        let entry = &scheduler.list().await[0];
        assert_eq!(entry.last_status, Some(JobStatus::Dead));
        assert_eq!(entry.next_run, at(1));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let scheduler = JobScheduler::new();
        let job = Arc::new(FlakyJob::fatal());
        scheduler
            .schedule_interval(
                job.clone(),
                IntervalSchedule::new(Duration::from_secs(1)).with_immediate(),
                at(0),
            )
            .await;

        let runs = scheduler.tick(at(0)).await;
        assert_eq!(runs[0].status, JobStatus::Dead);
        assert_eq!(job.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let scheduler = Arc::new(JobScheduler::new());
        let job = Arc::new(FlakyJob::new(0));
        scheduler
            .schedule_interval(
                job.clone(),
                IntervalSchedule::new(Duration::from_secs(3600)).with_immediate(),
                Utc::now(),
            )
            .await;

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(Duration::from_millis(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown();

        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("scheduler stops after shutdown")
            .unwrap();
        assert_eq!(job.calls.load(Ordering::SeqCst), 1);
    }
}
