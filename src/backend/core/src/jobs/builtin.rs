//! Built-in background jobs.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Job, JobContext, JobError, JobPriority, JobResult, RetryPolicy};
use crate::lifecycle::{run_cycle, ResourceStore, TenantDirectory};

/// Job: Demo cleanup / reseed cycle over every tenant.
///
/// Reads the tenant list on each run so newly created apps and demo-mode
/// toggles are picked up without a restart.
pub struct DemoCleanupJob {
    store: Arc<dyn ResourceStore>,
    tenants: Arc<dyn TenantDirectory>,
}

impl DemoCleanupJob {
    pub fn new(store: Arc<dyn ResourceStore>, tenants: Arc<dyn TenantDirectory>) -> Self {
        Self { store, tenants }
    }
}

#[async_trait]
impl Job for DemoCleanupJob {
    fn name(&self) -> &'static str {
        "demo_cleanup"
    }

    async fn execute(&self, ctx: &JobContext) -> JobResult {
        let tenants = self.tenants.list_tenants().await?;
        if ctx.is_cancelled() {
            return Err(JobError::fatal("Shutdown requested before cleanup started"));
        }

        let report = run_cycle(self.store.as_ref(), &tenants, ctx.now()).await;
        if !report.is_clean() {
            // Skipped tenants are picked up by the next scheduled run.
            ctx.warn(&format!(
                "Cleanup skipped {} of {} tenants",
                report.failed_tenants.len(),
                report.tenants
            ));
        }
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(2)
    }

    fn priority(&self) -> JobPriority {
        JobPriority::High
    }
}
