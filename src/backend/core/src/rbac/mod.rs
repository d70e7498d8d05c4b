//! Per-request authorization for app-defined resources.
//!
//! This module provides:
//! - **Models**: identifiers, the app definition document, roles, callers
//! - **Role resolution**: ordered, cycle-safe inheritance chains
//! - **Membership**: the directory contract the evaluator depends on
//! - **Policy Engine**: decides allow / deny / allow-with-scope per request
//! - **Authorization Middleware**: tower layer surfacing 401/403 and the scope
//!
//! # Usage
//!
//! ```rust,ignore
//! use appguard_core::rbac::{
//!     AccessRequest, Action, Caller, InMemoryMembershipDirectory, PolicyEngine, TenantId,
//! };
//!
//! let engine = PolicyEngine::new(Arc::new(InMemoryMembershipDirectory::new()));
//! engine.load_definition_json(TenantId(1), definition_document)?;
//!
//! let filter = engine
//!     .evaluate(
//!         &AccessRequest::new(TenantId(1), "note", Action::Query),
//!         &Caller::member("alice"),
//!     )
//!     .await?;
//! ```

pub mod membership;
pub mod middleware;
pub mod models;
pub mod policy;
pub mod roles;
pub mod scope;

pub use membership::{InMemoryMembershipDirectory, MembershipResolver};
pub use middleware::{RequireScopeLayer, RequireScopeService, ResourceScope};
pub use models::{
    AccessRequest, Action, ActionRule, AppDefinition, AppMember, Caller, Capability, DefaultRole,
    FunctionalRole, GroupId, GroupMembership, HistoryPolicy, MemberId, MembershipPolicy,
    MembershipRole, ReferenceDefinition, ResourceDefinition, ResourceId, RoleDefinition, RoleRef,
    ScopeSelector, SecurityPolicy, TeamId, TeamMembership, TenantId, ViewDefinition,
};
pub use policy::PolicyEngine;
pub use roles::resolve_role_chain;
pub use scope::{Denial, ScopeFilter, ScopePredicate};
