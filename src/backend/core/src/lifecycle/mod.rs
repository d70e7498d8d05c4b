//! Resource lifecycle: versioning and the demo cleanup / reseed cycle.
//!
//! - **Store**: the persistence contract and an in-memory implementation
//! - **History**: versions written atomically with updates, read newest first
//! - **Cleanup**: stateless cycle over a tenant list at an injected `now`

pub mod cleanup;
pub mod history;
pub mod store;

pub use cleanup::{run_cycle, CycleReport};
pub use history::{history, record_update, HistoryEntry};
pub use store::{
    InMemoryResourceStore, NewResource, NewVersion, ResourceRecord, ResourceStore,
    ResourceUpdate, ResourceVersion, TenantDirectory, TenantInfo,
};
