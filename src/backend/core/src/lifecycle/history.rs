//! Resource versioning.
//!
//! Updating a record whose type declares `history` writes a version with the
//! pre-update data in the same transaction as the update.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::store::{NewVersion, ResourceRecord, ResourceStore, ResourceUpdate};
use crate::error::{AppguardError, ErrorCode, Result};
use crate::rbac::{AppDefinition, MemberId, ResourceDefinition, ResourceId, TenantId};

/// One entry of a record's history, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub created_at: DateTime<Utc>,
    /// Absent when the type keeps history without data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<MemberId>,
}

/// Update a record, versioning it first when its type keeps history.
///
/// `editor` is the member making the change, `None` for system changes.
pub async fn record_update(
    store: &dyn ResourceStore,
    definition: &AppDefinition,
    tenant: TenantId,
    id: ResourceId,
    data: serde_json::Value,
    editor: Option<MemberId>,
) -> Result<ResourceRecord> {
    let record = load(store, tenant, id).await?;
    let version = definition
        .resource(&record.resource_type)
        .map(|resource| resource.history)
        .filter(|history| history.is_enabled())
        .map(|history| NewVersion {
            capture_data: history.keeps_data(),
            editor: editor.clone(),
        });

    debug!(tenant = %tenant, resource = %id, versioned = version.is_some(), "Updating resource");
    store
        .update(tenant, id, ResourceUpdate { data, editor }, version)
        .await
}

/// Versions of a record, newest first.
pub async fn history(
    store: &dyn ResourceStore,
    definition: &AppDefinition,
    tenant: TenantId,
    id: ResourceId,
) -> Result<Vec<HistoryEntry>> {
    let record = load(store, tenant, id).await?;
    let keeps_history = definition
        .resource(&record.resource_type)
        .is_some_and(|resource: &ResourceDefinition| resource.history.is_enabled());
    if !keeps_history {
        return Err(AppguardError::new(
            ErrorCode::InvalidInput,
            "Resource type has no history",
        ));
    }

    let mut versions = store.versions(tenant, id).await?;
    versions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    Ok(versions
        .into_iter()
        .map(|version| HistoryEntry {
            created_at: version.created_at,
            data: version.data,
            author: version.editor,
        })
        .collect())
}

async fn load(store: &dyn ResourceStore, tenant: TenantId, id: ResourceId) -> Result<ResourceRecord> {
    store
        .get(tenant, id)
        .await?
        .ok_or_else(|| AppguardError::not_found("Resource", id.to_string()))
}
