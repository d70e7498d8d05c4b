//! RBAC data models: identifiers, the app definition document, role references,
//! actions, callers and membership facts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppguardError;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Declares a strongly-typed numeric identifier backed by a database `BIGINT`.
macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// A tenant ("app") owning its own definition and data.
    TenantId
);
numeric_id!(TeamId);
numeric_id!(GroupId);
numeric_id!(
    /// A stored resource record.
    ResourceId
);

/// Strongly-typed member identifier. Authorship is recorded against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════════════

/// Sub-role of a team or group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    Member,
    Manager,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Manager => "manager",
        }
    }

    /// Whether a membership with this role satisfies `required`.
    ///
    /// Managers are members too; members are not managers.
    pub fn satisfies(&self, required: MembershipRole) -> bool {
        match required {
            MembershipRole::Member => true,
            MembershipRole::Manager => *self == MembershipRole::Manager,
        }
    }
}

/// Fixed access keywords interpreted structurally by the evaluator.
///
/// Never inherited and never looked up in the tenant's role table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionalRole {
    /// `$author`: the record's author.
    Author,
    /// `$public`: anyone, authenticated or not.
    Public,
    /// `$none`: intentionally anonymous access.
    None,
    /// `$team:member` / `$team:manager`
    Team(MembershipRole),
    /// `$group:member` / `$group:manager`
    Group(MembershipRole),
}

impl FunctionalRole {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Author => "$author",
            Self::Public => "$public",
            Self::None => "$none",
            Self::Team(MembershipRole::Member) => "$team:member",
            Self::Team(MembershipRole::Manager) => "$team:manager",
            Self::Group(MembershipRole::Member) => "$group:member",
            Self::Group(MembershipRole::Manager) => "$group:manager",
        }
    }
}

impl fmt::Display for FunctionalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for FunctionalRole {
    type Err = AppguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "$author" => Ok(Self::Author),
            "$public" => Ok(Self::Public),
            "$none" => Ok(Self::None),
            "$team:member" => Ok(Self::Team(MembershipRole::Member)),
            "$team:manager" => Ok(Self::Team(MembershipRole::Manager)),
            "$group:member" => Ok(Self::Group(MembershipRole::Member)),
            "$group:manager" => Ok(Self::Group(MembershipRole::Manager)),
            other => Err(AppguardError::invalid_definition(format!(
                "Unknown functional role: {}",
                other
            ))),
        }
    }
}

/// An entry of an access rule's `roles` list.
///
/// Strings starting with `$` are functional keywords; everything else names an
/// app-defined role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoleRef {
    Functional(FunctionalRole),
    App(String),
}

impl RoleRef {
    pub fn app(name: impl Into<String>) -> Self {
        Self::App(name.into())
    }
}

impl FromStr for RoleRef {
    type Err = AppguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('$') {
            s.parse().map(Self::Functional)
        } else {
            Ok(Self::App(s.to_string()))
        }
    }
}

impl TryFrom<String> for RoleRef {
    type Error = AppguardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoleRef> for String {
    fn from(role: RoleRef) -> Self {
        role.to_string()
    }
}

impl From<FunctionalRole> for RoleRef {
    fn from(role: FunctionalRole) -> Self {
        Self::Functional(role)
    }
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Functional(role) => write!(f, "{}", role),
            Self::App(name) => f.write_str(name),
        }
    }
}

/// An app-defined role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Roles whose grants this role also receives, highest priority first.
    #[serde(default)]
    pub inherits: Vec<String>,

    #[serde(default)]
    pub permissions: Vec<String>,
}

impl RoleDefinition {
    pub fn inheriting<I, S>(inherits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inherits: inherits.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Security Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Who may join a tenant without an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipPolicy {
    /// Any authenticated user; non-members act with the default role.
    Everyone,
    /// Members of the owning organization.
    Organization,
    /// Invited users only.
    Invite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultRole {
    pub policy: MembershipPolicy,
    pub role: String,
}

/// A tenant's role table and default membership policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub default: DefaultRole,

    #[serde(default)]
    pub roles: HashMap<String, RoleDefinition>,
}

impl SecurityPolicy {
    pub fn new(policy: MembershipPolicy, default_role: impl Into<String>) -> Self {
        Self {
            default: DefaultRole {
                policy,
                role: default_role.into(),
            },
            roles: HashMap::new(),
        }
    }

    pub fn with_role(mut self, name: impl Into<String>, definition: RoleDefinition) -> Self {
        self.roles.insert(name.into(), definition);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Actions
// ═══════════════════════════════════════════════════════════════════════════════

/// An operation against a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Get,
    Query,
    Count,
    Create,
    Update,
    Patch,
    Delete,
    History,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Query => "query",
            Self::Count => "count",
            Self::Create => "create",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::History => "history",
        }
    }

    /// Actions a read-only client capability is enough for.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Get | Self::Query | Self::Count | Self::History)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// App & Resource Definitions
// ═══════════════════════════════════════════════════════════════════════════════

/// Roles attached to one action of a resource type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRule {
    #[serde(default)]
    pub roles: Option<Vec<RoleRef>>,
}

/// A named view of a resource type with its own roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewDefinition {
    #[serde(default)]
    pub roles: Option<Vec<RoleRef>>,
}

/// `history: false | true | { data: bool }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryPolicy {
    Enabled(bool),
    Detailed { data: bool },
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

impl HistoryPolicy {
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Enabled(enabled) => *enabled,
            Self::Detailed { .. } => true,
        }
    }

    /// Whether versions capture the pre-update data.
    pub fn keeps_data(&self) -> bool {
        match self {
            Self::Enabled(enabled) => *enabled,
            Self::Detailed { data } => *data,
        }
    }
}

/// A data field holding the id of another resource of `resource` type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDefinition {
    pub resource: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Resource-level roles, used when neither view nor action declare any.
    #[serde(default)]
    pub roles: Option<Vec<RoleRef>>,

    #[serde(default)]
    pub actions: HashMap<Action, ActionRule>,

    #[serde(default)]
    pub views: HashMap<String, ViewDefinition>,

    #[serde(default)]
    pub history: HistoryPolicy,

    /// Lifetime of newly created records.
    #[serde(default, with = "humantime_serde")]
    pub expires: Option<Duration>,

    #[serde(default)]
    pub references: HashMap<String, ReferenceDefinition>,
}

impl ResourceDefinition {
    pub fn with_roles(mut self, roles: Vec<RoleRef>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn with_action_roles(mut self, action: Action, roles: Vec<RoleRef>) -> Self {
        self.actions.insert(action, ActionRule { roles: Some(roles) });
        self
    }

    pub fn with_view_roles(mut self, view: impl Into<String>, roles: Vec<RoleRef>) -> Self {
        self.views.insert(view.into(), ViewDefinition { roles: Some(roles) });
        self
    }

    pub fn with_reference(mut self, field: impl Into<String>, resource: impl Into<String>) -> Self {
        self.references.insert(
            field.into(),
            ReferenceDefinition {
                resource: resource.into(),
            },
        );
        self
    }
}

/// The parts of a tenant's declarative definition this crate reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    #[serde(default)]
    pub security: Option<SecurityPolicy>,

    /// Tenant-wide fallback roles for every resource action.
    #[serde(default)]
    pub roles: Option<Vec<RoleRef>>,

    #[serde(default)]
    pub resources: HashMap<String, ResourceDefinition>,
}

impl AppDefinition {
    pub fn with_security(mut self, security: SecurityPolicy) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_default_roles(mut self, roles: Vec<RoleRef>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, definition: ResourceDefinition) -> Self {
        self.resources.insert(name.into(), definition);
        self
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDefinition> {
        self.resources.get(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Callers & Requests
// ═══════════════════════════════════════════════════════════════════════════════

/// Coarse capability held by a privileged (administrative) client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "resources:read")]
    ResourcesRead,
    #[serde(rename = "resources:write")]
    ResourcesWrite,
}

/// The authenticated subject behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Caller {
    #[default]
    Anonymous,
    /// Administrative tooling acting on behalf of the tenant owner.
    Privileged { capabilities: Vec<Capability> },
    /// An authenticated user, whether or not a member row exists yet.
    Member(MemberId),
}

impl Caller {
    pub fn member(id: impl Into<MemberId>) -> Self {
        Self::Member(id.into())
    }

    pub fn privileged(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self::Privileged {
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn member_id(&self) -> Option<&MemberId> {
        match self {
            Self::Member(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Anonymous)
    }
}

/// An explicit team or group context asserted by the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeSelector {
    Team(TeamId),
    Group(GroupId),
}

/// What the routing layer hands to the evaluator for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub tenant: TenantId,
    pub resource_type: String,
    pub action: Action,
    pub view: Option<String>,
    pub selector: Option<ScopeSelector>,
}

impl AccessRequest {
    pub fn new(tenant: TenantId, resource_type: impl Into<String>, action: Action) -> Self {
        Self {
            tenant,
            resource_type: resource_type.into(),
            action,
            view: None,
            selector: None,
        }
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    pub fn with_team(mut self, team: TeamId) -> Self {
        self.selector = Some(ScopeSelector::Team(team));
        self
    }

    pub fn with_group(mut self, group: GroupId) -> Self {
        self.selector = Some(ScopeSelector::Group(group));
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Membership Facts
// ═══════════════════════════════════════════════════════════════════════════════

/// A member row of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMember {
    pub id: MemberId,
    /// Name of the app-defined role stored for this member.
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMembership {
    pub team_id: TeamId,
    pub role: MembershipRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: GroupId,
    pub role: MembershipRole,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
