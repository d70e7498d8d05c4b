#![allow(clippy::result_large_err)]
//! # Appguard Core
//!
//! Per-request authorization and resource lifecycle for app-defined data.
//!
//! ## Architecture
//!
//! - **RBAC**: Role inheritance, membership resolution and the policy evaluator
//!   that turns a request into allow / deny / allow-with-scope
//! - **Lifecycle**: Resource versioning and the demo cleanup / reseed cycle
//! - **Jobs**: Explicit interval scheduler driving the cleanup cycle
//! - **Database**: PostgreSQL adapters for the directory and the resource store
//! - **Telemetry**: Structured logging and Prometheus metrics

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod rbac;
pub mod telemetry;

pub use error::{AppguardError, ErrorCode, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{AppguardError, ErrorCode, Result};
    pub use crate::jobs::{DemoCleanupJob, IntervalSchedule, Job, JobScheduler, RetryPolicy};
    pub use crate::lifecycle::{
        history, record_update, run_cycle, CycleReport, HistoryEntry, InMemoryResourceStore,
        NewResource, ResourceRecord, ResourceStore, TenantDirectory, TenantInfo,
    };
    pub use crate::rbac::{
        AccessRequest, Action, AppDefinition, Caller, Capability, Denial,
        InMemoryMembershipDirectory, MemberId, MembershipResolver, PolicyEngine,
        RequireScopeLayer, ResourceDefinition, ResourceScope, RoleRef, ScopeFilter,
        ScopePredicate, TenantId,
    };
}
