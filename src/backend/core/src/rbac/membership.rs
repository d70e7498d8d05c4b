//! Membership resolution.
//!
//! The evaluator only sees the [`MembershipResolver`] trait. The PostgreSQL
//! directory lives in [`crate::db`]; [`InMemoryMembershipDirectory`] backs tests
//! and embedded use.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::models::{
    AppMember, GroupId, GroupMembership, MemberId, MembershipRole, TeamId, TeamMembership,
    TenantId,
};
use crate::error::{AppguardError, ErrorCode, Result};

/// Read-only view of a tenant's member directory.
///
/// Implementations perform I/O and may fail; the evaluator bounds every call
/// with a timeout and calls each method at most once per evaluation.
#[async_trait]
pub trait MembershipResolver: Send + Sync {
    /// The member row of `member` in `tenant`, if one exists.
    async fn get_member(&self, tenant: TenantId, member: &MemberId) -> Result<Option<AppMember>>;

    /// Teams of `tenant` that `member` belongs to, with their sub-role.
    async fn team_role_facts(&self, tenant: TenantId, member: &MemberId)
        -> Result<Vec<TeamMembership>>;

    /// Groups of `tenant` that `member` belongs to, with their sub-role.
    async fn group_role_facts(
        &self,
        tenant: TenantId,
        member: &MemberId,
    ) -> Result<Vec<GroupMembership>>;

    /// Every member of any of `teams`.
    async fn team_member_ids(&self, tenant: TenantId, teams: &[TeamId]) -> Result<Vec<MemberId>>;

    /// Every member of any of `groups`.
    async fn group_member_ids(&self, tenant: TenantId, groups: &[GroupId])
        -> Result<Vec<MemberId>>;

    /// Whether `member` belongs to the organization owning `tenant`.
    async fn is_organization_member(&self, tenant: TenantId, member: &MemberId) -> Result<bool>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory directory
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct DirectoryState {
    members: HashMap<(TenantId, MemberId), String>,
    teams: HashMap<TenantId, Vec<(TeamId, MemberId, MembershipRole)>>,
    groups: HashMap<TenantId, Vec<(GroupId, MemberId, MembershipRole)>>,
    organization: HashSet<(TenantId, MemberId)>,
    unavailable: bool,
    latency: Option<Duration>,
}

/// Thread-safe directory held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryMembershipDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryMembershipDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(self, tenant: TenantId, member: impl Into<MemberId>, role: impl Into<String>) -> Self {
        self.add_member(tenant, member, role);
        self
    }

    pub fn with_team_member(
        self,
        tenant: TenantId,
        team: TeamId,
        member: impl Into<MemberId>,
        role: MembershipRole,
    ) -> Self {
        self.add_team_member(tenant, team, member, role);
        self
    }

    pub fn with_group_member(
        self,
        tenant: TenantId,
        group: GroupId,
        member: impl Into<MemberId>,
        role: MembershipRole,
    ) -> Self {
        self.state
            .write()
            .groups
            .entry(tenant)
            .or_default()
            .push((group, member.into(), role));
        self
    }

    pub fn with_organization_member(self, tenant: TenantId, member: impl Into<MemberId>) -> Self {
        self.state.write().organization.insert((tenant, member.into()));
        self
    }

    /// Insert or replace the stored role of a member.
    pub fn add_member(&self, tenant: TenantId, member: impl Into<MemberId>, role: impl Into<String>) {
        self.state
            .write()
            .members
            .insert((tenant, member.into()), role.into());
    }

    pub fn add_team_member(
        &self,
        tenant: TenantId,
        team: TeamId,
        member: impl Into<MemberId>,
        role: MembershipRole,
    ) {
        self.state
            .write()
            .teams
            .entry(tenant)
            .or_default()
            .push((team, member.into(), role));
    }

    /// Make every lookup fail, as if the backing store were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    /// Delay every lookup by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.write().latency = latency;
    }

    async fn simulate_io(&self) -> Result<()> {
        let (unavailable, latency) = {
            let state = self.state.read();
            (state.unavailable, state.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if unavailable {
            return Err(AppguardError::new(
                ErrorCode::DatabaseConnectionFailed,
                "Membership directory unavailable",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipResolver for InMemoryMembershipDirectory {
    async fn get_member(&self, tenant: TenantId, member: &MemberId) -> Result<Option<AppMember>> {
        self.simulate_io().await?;
        let state = self.state.read();
        Ok(state
            .members
            .get(&(tenant, member.clone()))
            .map(|role| AppMember {
                id: member.clone(),
                role: role.clone(),
            }))
    }

    async fn team_role_facts(
        &self,
        tenant: TenantId,
        member: &MemberId,
    ) -> Result<Vec<TeamMembership>> {
        self.simulate_io().await?;
        let state = self.state.read();
        Ok(state
            .teams
            .get(&tenant)
            .into_iter()
            .flatten()
            .filter(|(_, m, _)| m == member)
            .map(|(team_id, _, role)| TeamMembership {
                team_id: *team_id,
                role: *role,
            })
            .collect())
    }

    async fn group_role_facts(
        &self,
        tenant: TenantId,
        member: &MemberId,
    ) -> Result<Vec<GroupMembership>> {
        self.simulate_io().await?;
        let state = self.state.read();
        Ok(state
            .groups
            .get(&tenant)
            .into_iter()
            .flatten()
            .filter(|(_, m, _)| m == member)
            .map(|(group_id, _, role)| GroupMembership {
                group_id: *group_id,
                role: *role,
            })
            .collect())
    }

    async fn team_member_ids(&self, tenant: TenantId, teams: &[TeamId]) -> Result<Vec<MemberId>> {
        self.simulate_io().await?;
        let state = self.state.read();
        let mut seen = HashSet::new();
        Ok(state
            .teams
            .get(&tenant)
            .into_iter()
            .flatten()
            .filter(|(team, _, _)| teams.contains(team))
            .filter(|(_, member, _)| seen.insert(member.clone()))
            .map(|(_, member, _)| member.clone())
            .collect())
    }

    async fn group_member_ids(
        &self,
        tenant: TenantId,
        groups: &[GroupId],
    ) -> Result<Vec<MemberId>> {
        self.simulate_io().await?;
        let state = self.state.read();
        let mut seen = HashSet::new();
        Ok(state
            .groups
            .get(&tenant)
            .into_iter()
            .flatten()
            .filter(|(group, _, _)| groups.contains(group))
            .filter(|(_, member, _)| seen.insert(member.clone()))
            .map(|(_, member, _)| member.clone())
            .collect())
    }

    async fn is_organization_member(&self, tenant: TenantId, member: &MemberId) -> Result<bool> {
        self.simulate_io().await?;
        Ok(self
            .state
            .read()
            .organization
            .contains(&(tenant, member.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: TenantId = TenantId(1);

    fn directory() -> InMemoryMembershipDirectory {
        InMemoryMembershipDirectory::new()
            .with_member(APP, "alice", "Admin")
            .with_team_member(APP, TeamId(10), "alice", MembershipRole::Manager)
            .with_team_member(APP, TeamId(10), "bob", MembershipRole::Member)
            .with_team_member(APP, TeamId(11), "bob", MembershipRole::Member)
            .with_team_member(APP, TeamId(11), "carol", MembershipRole::Member)
            .with_group_member(APP, GroupId(5), "carol", MembershipRole::Manager)
            .with_organization_member(APP, "dave")
    }

    #[tokio::test]
    async fn test_get_member() {
        let directory = directory();
        let alice = directory.get_member(APP, &"alice".into()).await.unwrap();
        assert_eq!(alice.map(|m| m.role), Some("Admin".to_string()));
        assert!(directory.get_member(APP, &"bob".into()).await.unwrap().is_none());
        assert!(directory
            .get_member(TenantId(2), &"alice".into())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_team_facts_and_members() {
        let directory = directory();
        let facts = directory.team_role_facts(APP, &"bob".into()).await.unwrap();
        assert_eq!(facts.len(), 2);

        let members = directory
            .team_member_ids(APP, &[TeamId(10), TeamId(11)])
            .await
            .unwrap();
        assert_eq!(
            members,
            vec![MemberId::new("alice"), MemberId::new("bob"), MemberId::new("carol")]
        );
    }

    #[tokio::test]
    async fn test_group_facts() {
        let directory = directory();
        let facts = directory.group_role_facts(APP, &"carol".into()).await.unwrap();
        assert_eq!(
            facts,
            vec![GroupMembership {
                group_id: GroupId(5),
                role: MembershipRole::Manager
            }]
        );
        let members = directory.group_member_ids(APP, &[GroupId(5)]).await.unwrap();
        assert_eq!(members, vec![MemberId::new("carol")]);
    }

    #[tokio::test]
    async fn test_organization_membership() {
        let directory = directory();
        assert!(directory
            .is_organization_member(APP, &"dave".into())
            .await
            .unwrap());
        assert!(!directory
            .is_organization_member(APP, &"alice".into())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_directory_fails() {
        let directory = directory();
        directory.set_unavailable(true);
        let err = directory.get_member(APP, &"alice".into()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DatabaseConnectionFailed);
    }
}
