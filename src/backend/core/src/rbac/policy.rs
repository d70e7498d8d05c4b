//! Policy engine for evaluating authorization decisions.
//!
//! The policy engine answers the question:
//! "Which records of type T may caller C touch with action A in app X?"
//!
//! The answer is a [`ScopeFilter`]: unconditional access, a denial with its
//! HTTP-equivalent reason, or a set of OR-combined record predicates.

use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use super::membership::MembershipResolver;
use super::models::{
    AccessRequest, Action, AppDefinition, Caller, Capability, FunctionalRole, MemberId,
    MembershipPolicy, MembershipRole, ResourceDefinition, RoleRef, ScopeSelector, TenantId,
};
use super::roles::chain_contains;
use super::scope::{Denial, ScopeFilter, ScopePredicate};
use crate::config::AuthzConfig;
use crate::error::{AppguardError, ErrorCode, Result};
use crate::telemetry::AuthzMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Holds every tenant's app definition and evaluates requests against it.
///
/// Cheap to clone; clones share the definition registry. Evaluations keep no
/// state between calls and may run fully in parallel.
#[derive(Clone)]
pub struct PolicyEngine {
    /// App definitions indexed by tenant.
    definitions: Arc<DashMap<TenantId, Arc<AppDefinition>>>,

    membership: Arc<dyn MembershipResolver>,

    config: AuthzConfig,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("tenants", &self.definitions.len())
            .field("config", &self.config)
            .finish()
    }
}

impl PolicyEngine {
    pub fn new(membership: Arc<dyn MembershipResolver>) -> Self {
        Self {
            definitions: Arc::new(DashMap::new()),
            membership,
            config: AuthzConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AuthzConfig) -> Self {
        self.config = config;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Definition management
    // ─────────────────────────────────────────────────────────────────────────

    /// Register or replace the definition of a tenant.
    pub fn load_definition(&self, tenant: TenantId, definition: AppDefinition) {
        debug!(tenant = %tenant, resources = definition.resources.len(), "Loaded app definition");
        self.definitions.insert(tenant, Arc::new(definition));
    }

    /// Parse and register a definition document.
    pub fn load_definition_json(&self, tenant: TenantId, document: serde_json::Value) -> Result<()> {
        let definition: AppDefinition = serde_json::from_value(document).map_err(|e| {
            AppguardError::with_internal(
                ErrorCode::InvalidDefinition,
                "App definition is invalid",
                e.to_string(),
            )
        })?;
        self.load_definition(tenant, definition);
        Ok(())
    }

    pub fn remove_definition(&self, tenant: TenantId) -> bool {
        self.definitions.remove(&tenant).is_some()
    }

    pub fn definition(&self, tenant: TenantId) -> Option<Arc<AppDefinition>> {
        self.definitions.get(&tenant).map(|d| Arc::clone(d.value()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Evaluation
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide the scope of `request` for `caller`.
    ///
    /// Denials are a normal outcome and come back as `Ok(ScopeFilter::Deny)`.
    /// `Err` is reserved for requests naming an unknown app or resource type.
    #[instrument(
        skip(self, request, caller),
        fields(
            tenant = %request.tenant,
            resource = %request.resource_type,
            action = %request.action,
        )
    )]
    pub async fn evaluate(&self, request: &AccessRequest, caller: &Caller) -> Result<ScopeFilter> {
        let definition = self
            .definition(request.tenant)
            .ok_or_else(|| AppguardError::not_found("App", request.tenant.to_string()))?;

        let resource = definition.resource(&request.resource_type).ok_or_else(|| {
            AppguardError::new(
                ErrorCode::ResourceNotFound,
                format!("App does not have resources called {}", request.resource_type),
            )
        })?;

        let filter = match self.decide(&definition, resource, request, caller).await {
            Ok(filter) => filter,
            Err(denial) => ScopeFilter::Deny(denial),
        };

        AuthzMetrics::record_decision(filter.outcome(), request.action.as_str());
        match &filter {
            ScopeFilter::Deny(denial) => debug!(reason = %denial, "Access denied"),
            ScopeFilter::AllowIf(predicates) => {
                debug!(predicates = predicates.len(), "Access granted with scope")
            }
            ScopeFilter::Allow => debug!("Access granted"),
        }

        Ok(filter)
    }

    /// Like [`evaluate`](Self::evaluate), but a denial becomes an `Err`
    /// carrying the 401/403 to surface.
    pub async fn enforce(&self, request: &AccessRequest, caller: &Caller) -> Result<ScopeFilter> {
        self.evaluate(request, caller).await?.into_result()
    }

    async fn decide(
        &self,
        definition: &AppDefinition,
        resource: &ResourceDefinition,
        request: &AccessRequest,
        caller: &Caller,
    ) -> std::result::Result<ScopeFilter, Denial> {
        let action = request.action;

        // 1. Privileged clients only need the matching capability.
        if let Caller::Privileged { capabilities } = caller {
            return if has_capability(capabilities, action) {
                Ok(ScopeFilter::Allow)
            } else {
                Err(Denial::InsufficientPermissions)
            };
        }

        // 2. Effective roles.
        let mut roles = effective_roles(definition, resource, request)?;
        if roles.is_empty() {
            return Err(Denial::ActionPrivate);
        }

        // 3. An explicit team or group context implies its membership role.
        match request.selector {
            Some(ScopeSelector::Team(_))
                if !roles
                    .iter()
                    .any(|r| matches!(r, RoleRef::Functional(FunctionalRole::Team(_)))) =>
            {
                roles.push(FunctionalRole::Team(MembershipRole::Member).into());
            }
            Some(ScopeSelector::Group(_))
                if !roles
                    .iter()
                    .any(|r| matches!(r, RoleRef::Functional(FunctionalRole::Group(_)))) =>
            {
                roles.push(FunctionalRole::Group(MembershipRole::Member).into());
            }
            _ => {}
        }

        // 4. Split.
        let mut functional: HashSet<FunctionalRole> = HashSet::new();
        let mut app_roles: Vec<&str> = Vec::new();
        for role in &roles {
            match role {
                RoleRef::Functional(f) => {
                    functional.insert(*f);
                }
                RoleRef::App(name) => app_roles.push(name),
            }
        }
        let public = functional.contains(&FunctionalRole::Public);

        // 5. Public, except counts, which still honour scoping.
        if public && action != Action::Count {
            return Ok(ScopeFilter::Allow);
        }

        // 6. Intentionally anonymous.
        if functional.contains(&FunctionalRole::None) && !caller.is_authenticated() {
            return Ok(ScopeFilter::Allow);
        }

        // 7.
        if !public && !caller.is_authenticated() {
            return Err(Denial::Unauthenticated);
        }

        let mut lookups = caller
            .member_id()
            .map(|member| Lookups::new(self, request.tenant, member));

        // 8. Record predicates.
        let mut predicates = Vec::new();
        let mut unmatched_scope = false;
        if let Some(lookups) = lookups.as_mut() {
            if functional.contains(&FunctionalRole::Author) && action != Action::Create {
                predicates.push(ScopePredicate::OwnedByAuthor(lookups.member.clone()));
            }

            if let Some(required) = required_membership(&functional, FunctionalRole::Team) {
                match lookups.team_predicate(required, request.selector).await? {
                    Some(predicate) => predicates.push(predicate),
                    None => unmatched_scope = true,
                }
            }

            if let Some(required) = required_membership(&functional, FunctionalRole::Group) {
                match lookups.group_predicate(required, request.selector).await? {
                    Some(predicate) => predicates.push(predicate),
                    None => unmatched_scope = true,
                }
            }
        }

        // 9. App-defined roles.
        let mut granted = false;
        if !app_roles.is_empty() && !public {
            let grant = match (lookups.as_mut(), definition.security.as_ref()) {
                (Some(lookups), Some(security)) => {
                    let role = match lookups.stored_role().await? {
                        Some(role) => Some(role),
                        None => match security.default.policy {
                            MembershipPolicy::Everyone => Some(security.default.role.clone()),
                            MembershipPolicy::Organization | MembershipPolicy::Invite => {
                                if lookups.is_organization_member().await? {
                                    Some(security.default.role.clone())
                                } else {
                                    None
                                }
                            }
                        },
                    };

                    match role {
                        Some(role) => RoleGrant::from(chain_contains(
                            security,
                            &role,
                            app_roles.iter().copied(),
                        )),
                        None => RoleGrant::NotMember,
                    }
                }
                _ => RoleGrant::Insufficient,
            };

            granted = grant == RoleGrant::Granted;
            if !granted && predicates.is_empty() {
                return Err(match grant {
                    RoleGrant::NotMember => Denial::NotAppMember,
                    _ => Denial::InsufficientPermissions,
                });
            }
        }

        // 10. A team or group role the caller holds nowhere grants nothing.
        let unconditional = functional.contains(&FunctionalRole::Author)
            || functional.contains(&FunctionalRole::None);
        if predicates.is_empty() && unmatched_scope && !granted && !unconditional {
            return Err(Denial::InsufficientPermissions);
        }
        if predicates.is_empty() {
            Ok(ScopeFilter::Allow)
        } else {
            Ok(ScopeFilter::AllowIf(predicates))
        }
    }
}

/// Outcome of the app-defined role check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoleGrant {
    Granted,
    Insufficient,
    NotMember,
}

impl From<bool> for RoleGrant {
    fn from(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Insufficient
        }
    }
}

/// Write implies read.
fn has_capability(capabilities: &[Capability], action: Action) -> bool {
    if action.is_read_only() {
        capabilities.iter().any(|c| {
            matches!(c, Capability::ResourcesRead | Capability::ResourcesWrite)
        })
    } else {
        capabilities.contains(&Capability::ResourcesWrite)
    }
}

/// View roles, then action roles, then resource roles, then the app's default
/// roles. A declared but empty list does not fall through.
fn effective_roles(
    definition: &AppDefinition,
    resource: &ResourceDefinition,
    request: &AccessRequest,
) -> std::result::Result<Vec<RoleRef>, Denial> {
    let view_roles = match &request.view {
        Some(view) => resource
            .views
            .get(view)
            .ok_or(Denial::ConfigurationInconsistency)?
            .roles
            .as_ref(),
        None => None,
    };

    Ok(view_roles
        .or_else(|| {
            resource
                .actions
                .get(&request.action)
                .and_then(|rule| rule.roles.as_ref())
        })
        .or(resource.roles.as_ref())
        .or(definition.roles.as_ref())
        .cloned()
        .unwrap_or_default())
}

/// The weakest team/group sub-role present among `functional`.
///
/// A manager also counts as a member, so `member` covers `manager`.
fn required_membership(
    functional: &HashSet<FunctionalRole>,
    kind: fn(MembershipRole) -> FunctionalRole,
) -> Option<MembershipRole> {
    [MembershipRole::Member, MembershipRole::Manager]
        .into_iter()
        .find(|role| functional.contains(&kind(*role)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Per-evaluation lookups
// ═══════════════════════════════════════════════════════════════════════════════

/// Membership facts fetched lazily for one evaluation, each at most once.
struct Lookups<'a> {
    engine: &'a PolicyEngine,
    tenant: TenantId,
    member: &'a MemberId,
    stored_role: Option<Option<String>>,
    organization_member: Option<bool>,
}

impl<'a> Lookups<'a> {
    fn new(engine: &'a PolicyEngine, tenant: TenantId, member: &'a MemberId) -> Self {
        Self {
            engine,
            tenant,
            member,
            stored_role: None,
            organization_member: None,
        }
    }

    async fn stored_role(&mut self) -> std::result::Result<Option<String>, Denial> {
        if let Some(role) = &self.stored_role {
            return Ok(role.clone());
        }
        let engine = self.engine;
        let row = bounded(
            engine,
            "get_member",
            engine.membership.get_member(self.tenant, self.member),
        )
        .await?;
        let role = row.map(|m| m.role);
        self.stored_role = Some(role.clone());
        Ok(role)
    }

    async fn is_organization_member(&mut self) -> std::result::Result<bool, Denial> {
        if let Some(known) = self.organization_member {
            return Ok(known);
        }
        let engine = self.engine;
        let known = bounded(
            engine,
            "is_organization_member",
            engine.membership.is_organization_member(self.tenant, self.member),
        )
        .await?;
        self.organization_member = Some(known);
        Ok(known)
    }

    async fn team_predicate(
        &self,
        required: MembershipRole,
        selector: Option<ScopeSelector>,
    ) -> std::result::Result<Option<ScopePredicate>, Denial> {
        let engine = self.engine;
        let facts = bounded(
            engine,
            "team_role_facts",
            engine.membership.team_role_facts(self.tenant, self.member),
        )
        .await?;

        let teams: Vec<_> = facts
            .into_iter()
            .filter(|fact| fact.role.satisfies(required))
            .filter(|fact| match selector {
                Some(ScopeSelector::Team(team)) => fact.team_id == team,
                _ => true,
            })
            .map(|fact| fact.team_id)
            .collect();

        if teams.is_empty() {
            return Ok(None);
        }

        let members = bounded(
            engine,
            "team_member_ids",
            engine.membership.team_member_ids(self.tenant, &teams),
        )
        .await?;
        Ok(Some(ScopePredicate::AuthoredByAnyOf(members)))
    }

    async fn group_predicate(
        &self,
        required: MembershipRole,
        selector: Option<ScopeSelector>,
    ) -> std::result::Result<Option<ScopePredicate>, Denial> {
        let engine = self.engine;
        let facts = bounded(
            engine,
            "group_role_facts",
            engine.membership.group_role_facts(self.tenant, self.member),
        )
        .await?;

        let groups: Vec<_> = facts
            .into_iter()
            .filter(|fact| fact.role.satisfies(required))
            .filter(|fact| match selector {
                Some(ScopeSelector::Group(group)) => fact.group_id == group,
                _ => true,
            })
            .map(|fact| fact.group_id)
            .collect();

        if groups.is_empty() {
            return Ok(None);
        }

        let members = bounded(
            engine,
            "group_member_ids",
            engine.membership.group_member_ids(self.tenant, &groups),
        )
        .await?;
        Ok(Some(ScopePredicate::AuthoredByAnyOf(members)))
    }
}

/// Run one membership lookup under the configured timeout.
async fn bounded<T, F>(
    engine: &PolicyEngine,
    lookup: &'static str,
    future: F,
) -> std::result::Result<T, Denial>
where
    F: Future<Output = Result<T>>,
{
    let timeout = engine.config.membership_timeout;
    match tokio::time::timeout(timeout, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(lookup, error = %e, "Membership lookup failed");
            AuthzMetrics::record_lookup_failure(lookup);
            Err(Denial::MembershipLookupFailed)
        }
        Err(_) => {
            error!(lookup, timeout_ms = timeout.as_millis() as u64, "Membership lookup timed out");
            AuthzMetrics::record_lookup_failure(lookup);
            Err(Denial::MembershipLookupFailed)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
