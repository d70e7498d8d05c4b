//! The job contract and per-run bookkeeping.
//!
//! - **Job**: what the scheduler runs on every due tick
//! - **JobContext**: the tick time and shutdown signal handed to a run
//! - **RetryPolicy**: how many failed attempts a run may retry, and how long to wait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::AppguardError;

// ═══════════════════════════════════════════════════════════════════════════════
// Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifier of a schedule registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a run, or a registration, currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Running,
    Completed,
    /// An attempt failed and another one follows.
    Failed,
    /// The run gave up; the registration stays scheduled.
    Dead,
    Cancelled,
}

/// Order of jobs due in the same tick.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure of one attempt.
#[derive(Debug, Clone)]
pub struct JobError {
    pub message: String,
    pub retryable: bool,
    pub code: Option<String>,
}

impl JobError {
    /// A transient failure; the retry policy decides whether to try again.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// A failure no retry can fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::retryable(message)
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for JobError {}

/// Store and directory errors keep their retryability.
impl From<AppguardError> for JobError {
    fn from(error: AppguardError) -> Self {
        Self {
            message: error.user_message().to_string(),
            retryable: error.is_retryable(),
            code: Some(error.code().to_string()),
        }
    }
}

pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Retries
// ═══════════════════════════════════════════════════════════════════════════════

/// Wait between two attempts of the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed(Duration),
    /// Doubles from `initial` on every retry, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(300),
        }
    }
}

impl BackoffStrategy {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed(delay)
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { initial, max } => initial
                .checked_mul(2u32.saturating_pow(retry))
                .map_or(max, |delay| delay.min(max)),
        }
    }
}

/// Retry behaviour of a job. Only retryable errors are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_retries(3)
    }
}

impl RetryPolicy {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether a run that already retried `retries` times may try again.
    pub fn should_retry(&self, retries: u32, error: &JobError) -> bool {
        error.retryable && retries < self.max_retries
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Runs
// ═══════════════════════════════════════════════════════════════════════════════

/// Bookkeeping for one run of a registration.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub id: JobId,
    pub job: &'static str,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub attempts: u32,
    /// Tick time the run was started for.
    pub scheduled_for: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobRun {
    pub fn new(id: JobId, job: &'static str, priority: JobPriority, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job,
            status: JobStatus::Scheduled,
            priority,
            attempts: 0,
            scheduled_for: now,
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    pub(crate) fn start_attempt(&mut self) {
        self.status = JobStatus::Running;
        self.started_at.get_or_insert_with(Utc::now);
        self.attempts += 1;
    }

    pub(crate) fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: &JobError, retrying: bool) {
        self.last_error = Some(error.message.clone());
        if retrying {
            self.status = JobStatus::Failed;
        } else {
            self.status = JobStatus::Dead;
            self.finished_at = Some(Utc::now());
        }
    }
}

/// What a job sees while it runs.
pub struct JobContext {
    pub run: JobRun,
    now: DateTime<Utc>,
    shutdown: watch::Receiver<bool>,
}

impl JobContext {
    pub fn new(run: JobRun, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            now: run.scheduled_for,
            run,
            shutdown,
        }
    }

    /// The tick time. Jobs read this instead of the wall clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            job_id = %self.run.id,
            job = self.run.job,
            attempt = self.run.attempts,
            message
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A unit of background work run by the scheduler.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run once for `ctx.now()`.
    ///
    /// Return [`JobError::retryable`] for transient failures and
    /// [`JobError::fatal`] for the rest.
    async fn execute(&self, ctx: &JobContext) -> JobResult;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }

    /// Upper bound for a single attempt. An attempt that runs over counts as
    /// a retryable failure.
    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(300))
    }
}
