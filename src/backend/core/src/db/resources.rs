//! PostgreSQL resource store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::warn;

use super::scope::push_scope_filter;
use crate::error::{AppguardError, Result};
use crate::lifecycle::{
    NewResource, NewVersion, ResourceRecord, ResourceStore, ResourceUpdate, ResourceVersion,
    TenantDirectory, TenantInfo,
};
use crate::rbac::{AppDefinition, MemberId, ResourceId, ScopeFilter, TenantId};

macro_rules! resource_columns {
    () => {
        "id, app_id, resource_type, data, author_id, editor_id, seed, ephemeral, expires, created_at, updated_at"
    };
}

/// [`ResourceStore`] and [`TenantDirectory`] over `app`, `resource` and
/// `resource_version`.
#[derive(Clone)]
pub struct PgResourceStore {
    pool: PgPool,
}

impl PgResourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn delete_ephemeral(&self, tenant: TenantId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM resource WHERE app_id = $1 AND ephemeral")
            .bind(tenant.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_seed(&self, tenant: TenantId) -> Result<Vec<ResourceRecord>> {
        let rows = sqlx::query_as::<_, ResourceRow>(concat!(
            "SELECT ",
            resource_columns!(),
            " FROM resource WHERE app_id = $1 AND seed ORDER BY id"
        ))
        .bind(tenant.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert(&self, resource: NewResource) -> Result<ResourceRecord> {
        let row = sqlx::query_as::<_, ResourceRow>(concat!(
            "INSERT INTO resource (app_id, resource_type, data, author_id, seed, ephemeral, expires) ",
            "VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING ",
            resource_columns!()
        ))
        .bind(resource.tenant.get())
        .bind(&resource.resource_type)
        .bind(&resource.data)
        .bind(resource.author.as_ref().map(MemberId::as_str))
        .bind(resource.seed)
        .bind(resource.ephemeral)
        .bind(resource.expires)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn delete_expired(&self, tenant: TenantId, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM resource
            WHERE app_id = $1 AND NOT seed AND expires < $2
            "#,
        )
        .bind(tenant.get())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, tenant: TenantId, id: ResourceId) -> Result<Option<ResourceRecord>> {
        let row = sqlx::query_as::<_, ResourceRow>(concat!(
            "SELECT ",
            resource_columns!(),
            " FROM resource WHERE app_id = $1 AND id = $2"
        ))
        .bind(tenant.get())
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn update(
        &self,
        tenant: TenantId,
        id: ResourceId,
        update: ResourceUpdate,
        version: Option<NewVersion>,
    ) -> Result<ResourceRecord> {
        let mut tx = self.pool.begin().await?;

        let (current, author) = sqlx::query_as::<_, (serde_json::Value, Option<String>)>(
            "SELECT data, author_id FROM resource WHERE app_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant.get())
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppguardError::not_found("Resource", id.to_string()))?;

        if let Some(version) = version {
            sqlx::query(
                r#"
                INSERT INTO resource_version (resource_id, data, author_id, editor_id)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(id.get())
            .bind(version.capture_data.then_some(current))
            .bind(author)
            .bind(version.editor.as_ref().map(MemberId::as_str))
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query_as::<_, ResourceRow>(concat!(
            "UPDATE resource SET data = $3, editor_id = $4, updated_at = NOW() ",
            "WHERE app_id = $1 AND id = $2 RETURNING ",
            resource_columns!()
        ))
        .bind(tenant.get())
        .bind(id.get())
        .bind(&update.data)
        .bind(update.editor.as_ref().map(MemberId::as_str))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn versions(&self, tenant: TenantId, id: ResourceId) -> Result<Vec<ResourceVersion>> {
        let rows = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT v.id, v.resource_id, v.data, v.author_id, v.editor_id, v.created_at
            FROM resource_version v
            JOIN resource r ON r.id = v.resource_id
            WHERE r.app_id = $1 AND v.resource_id = $2
            ORDER BY v.created_at DESC, v.id DESC
            "#,
        )
        .bind(tenant.get())
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list(
        &self,
        tenant: TenantId,
        resource_type: &str,
        scope: &ScopeFilter,
    ) -> Result<Vec<ResourceRecord>> {
        if scope.is_denied() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(concat!(
            "SELECT ",
            resource_columns!(),
            " FROM resource WHERE app_id = "
        ));
        builder
            .push_bind(tenant.get())
            .push(" AND resource_type = ")
            .push_bind(resource_type.to_string());
        push_scope_filter(&mut builder, scope);
        builder.push(" ORDER BY id");

        let rows = builder
            .build_query_as::<ResourceRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl TenantDirectory for PgResourceStore {
    async fn list_tenants(&self) -> Result<Vec<TenantInfo>> {
        let rows = sqlx::query_as::<_, (i64, serde_json::Value, bool)>(
            "SELECT id, definition, demo_mode FROM app ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tenants = Vec::with_capacity(rows.len());
        for (id, definition, demo_mode) in rows {
            match serde_json::from_value::<AppDefinition>(definition) {
                Ok(definition) => tenants.push(TenantInfo {
                    id: TenantId(id),
                    demo_mode,
                    definition: Arc::new(definition),
                }),
                Err(e) => warn!(tenant = id, error = %e, "Skipping app with invalid definition"),
            }
        }
        Ok(tenants)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
pub struct ResourceRow {
    pub id: i64,
    pub app_id: i64,
    pub resource_type: String,
    pub data: serde_json::Value,
    pub author_id: Option<String>,
    pub editor_id: Option<String>,
    pub seed: bool,
    pub ephemeral: bool,
    pub expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ResourceRow> for ResourceRecord {
    fn from(row: ResourceRow) -> Self {
        Self {
            id: ResourceId(row.id),
            tenant: TenantId(row.app_id),
            resource_type: row.resource_type,
            data: row.data,
            author: row.author_id.map(MemberId::new),
            editor: row.editor_id.map(MemberId::new),
            seed: row.seed,
            ephemeral: row.ephemeral,
            expires: row.expires,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct VersionRow {
    pub id: i64,
    pub resource_id: i64,
    pub data: Option<serde_json::Value>,
    pub author_id: Option<String>,
    pub editor_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<VersionRow> for ResourceVersion {
    fn from(row: VersionRow) -> Self {
        Self {
            id: row.id,
            resource_id: ResourceId(row.resource_id),
            data: row.data,
            author: row.author_id.map(MemberId::new),
            editor: row.editor_id.map(MemberId::new),
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_row_conversion() {
        let now = Utc::now();
        let record: ResourceRecord = ResourceRow {
            id: 7,
            app_id: 2,
            resource_type: "task".to_string(),
            data: json!({"title": "x"}),
            author_id: Some("alice".to_string()),
            editor_id: None,
            seed: false,
            ephemeral: true,
            expires: Some(now),
            created_at: now,
            updated_at: now,
        }
        .into();

        assert_eq!(record.id, ResourceId(7));
        assert_eq!(record.tenant, TenantId(2));
        assert_eq!(record.author, Some(MemberId::new("alice")));
        assert!(record.ephemeral);
        assert!(!record.is_expired(now));
    }
}
