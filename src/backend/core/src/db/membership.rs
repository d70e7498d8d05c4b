//! PostgreSQL member directory.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{AppguardError, ErrorCode, Result};
use crate::rbac::{
    AppMember, GroupId, GroupMembership, MemberId, MembershipResolver, MembershipRole, TeamId,
    TeamMembership, TenantId,
};

/// [`MembershipResolver`] over `app_member`, `team_member`, `group_member` and
/// `organization_member`. Every method is a single query.
#[derive(Clone)]
pub struct PgMembershipDirectory {
    pool: PgPool,
}

impl PgMembershipDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_role(role: &str) -> Result<MembershipRole> {
    match role {
        "member" => Ok(MembershipRole::Member),
        "manager" => Ok(MembershipRole::Manager),
        other => Err(AppguardError::with_internal(
            ErrorCode::DeserializationError,
            "Invalid membership data",
            format!("Unknown membership role: {}", other),
        )),
    }
}

#[async_trait]
impl MembershipResolver for PgMembershipDirectory {
    async fn get_member(&self, tenant: TenantId, member: &MemberId) -> Result<Option<AppMember>> {
        let row = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT member_id, role
            FROM app_member
            WHERE app_id = $1 AND member_id = $2
            "#,
        )
        .bind(tenant.get())
        .bind(member.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, role)| AppMember {
            id: MemberId::new(id),
            role,
        }))
    }

    async fn team_role_facts(
        &self,
        tenant: TenantId,
        member: &MemberId,
    ) -> Result<Vec<TeamMembership>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT team_id, role
            FROM team_member
            WHERE app_id = $1 AND member_id = $2
            ORDER BY team_id
            "#,
        )
        .bind(tenant.get())
        .bind(member.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(team_id, role)| {
                Ok(TeamMembership {
                    team_id: TeamId(team_id),
                    role: parse_role(&role)?,
                })
            })
            .collect()
    }

    async fn group_role_facts(
        &self,
        tenant: TenantId,
        member: &MemberId,
    ) -> Result<Vec<GroupMembership>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT group_id, role
            FROM group_member
            WHERE app_id = $1 AND member_id = $2
            ORDER BY group_id
            "#,
        )
        .bind(tenant.get())
        .bind(member.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(group_id, role)| {
                Ok(GroupMembership {
                    group_id: GroupId(group_id),
                    role: parse_role(&role)?,
                })
            })
            .collect()
    }

    async fn team_member_ids(&self, tenant: TenantId, teams: &[TeamId]) -> Result<Vec<MemberId>> {
        if teams.is_empty() {
            return Ok(Vec::new());
        }
        let teams: Vec<i64> = teams.iter().map(|t| t.get()).collect();

        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT member_id
            FROM team_member
            WHERE app_id = $1 AND team_id = ANY($2)
            ORDER BY member_id
            "#,
        )
        .bind(tenant.get())
        .bind(&teams)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(MemberId::new).collect())
    }

    async fn group_member_ids(
        &self,
        tenant: TenantId,
        groups: &[GroupId],
    ) -> Result<Vec<MemberId>> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let groups: Vec<i64> = groups.iter().map(|g| g.get()).collect();

        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT member_id
            FROM group_member
            WHERE app_id = $1 AND group_id = ANY($2)
            ORDER BY member_id
            "#,
        )
        .bind(tenant.get())
        .bind(&groups)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(MemberId::new).collect())
    }

    async fn is_organization_member(&self, tenant: TenantId, member: &MemberId) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM organization_member
                WHERE app_id = $1 AND member_id = $2
            )
            "#,
        )
        .bind(tenant.get())
        .bind(member.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("member").unwrap(), MembershipRole::Member);
        assert_eq!(parse_role("manager").unwrap(), MembershipRole::Manager);

        let err = parse_role("owner").unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeserializationError);
    }
}
