//! Background jobs for Appguard.
//!
//! - **Job Definitions**: The `Job` trait, per-run bookkeeping and retry policies
//! - **Scheduler**: Interval scheduling driven by an explicit `tick(now)`
//! - **Built-in Jobs**: The demo cleanup / reseed cycle
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  tick(now)  ┌──────────────┐  run_cycle(store, tenants, now)
//! │ JobScheduler  │────────────▶│ DemoCleanup  │──────────────────────────────▶ lifecycle
//! │ (interval)    │             │ Job          │
//! └───────────────┘             └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use appguard_core::jobs::{DemoCleanupJob, IntervalSchedule, JobScheduler};
//!
//! let scheduler = JobScheduler::new();
//! let job = Arc::new(DemoCleanupJob::new(store.clone(), store));
//! scheduler
//!     .schedule_interval(job, IntervalSchedule::new(Duration::from_secs(3600)), Utc::now())
//!     .await;
//! scheduler.run(Duration::from_secs(1)).await;
//! ```

pub mod job;
pub mod scheduler;

pub use job::{
    BackoffStrategy, Job, JobContext, JobError, JobId, JobPriority, JobResult, JobRun, JobStatus,
    RetryPolicy,
};
pub use scheduler::{IntervalSchedule, JobScheduler, ScheduledJob};

// Built-in jobs
mod builtin;
pub use builtin::DemoCleanupJob;
