//! Resource storage contract.
//!
//! [`ResourceStore`] and [`TenantDirectory`] are everything the lifecycle
//! manager needs from persistence. The PostgreSQL implementation lives in
//! [`crate::db`]; [`InMemoryResourceStore`] backs tests and embedded use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AppguardError, Result};
use crate::rbac::{AppDefinition, MemberId, ResourceId, ScopeFilter, TenantId};

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// A stored resource with its lifecycle flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub tenant: TenantId,
    pub resource_type: String,
    pub data: serde_json::Value,
    pub author: Option<MemberId>,
    pub editor: Option<MemberId>,
    /// Template data shipped with the tenant's demo mode.
    pub seed: bool,
    /// Disposable per-demo-session copy.
    pub ephemeral: bool,
    pub expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Seeds never expire; neither does anything without a timestamp.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.seed && self.expires.is_some_and(|expires| expires < now)
    }
}

/// A record to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub tenant: TenantId,
    pub resource_type: String,
    pub data: serde_json::Value,
    pub author: Option<MemberId>,
    pub seed: bool,
    pub ephemeral: bool,
    pub expires: Option<DateTime<Utc>>,
}

impl NewResource {
    pub fn new(tenant: TenantId, resource_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            tenant,
            resource_type: resource_type.into(),
            data,
            author: None,
            seed: false,
            ephemeral: false,
            expires: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<MemberId>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn as_seed(mut self) -> Self {
        self.seed = true;
        self
    }

    pub fn as_ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }
}

/// New content for an existing record.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUpdate {
    pub data: serde_json::Value,
    /// `None` for system-initiated changes.
    pub editor: Option<MemberId>,
}

/// Version to write together with an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVersion {
    /// Whether the pre-update data is kept in the snapshot.
    pub capture_data: bool,
    pub editor: Option<MemberId>,
}

/// Immutable snapshot taken before an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceVersion {
    pub id: i64,
    pub resource_id: ResourceId,
    pub data: Option<serde_json::Value>,
    /// Author of the record when the snapshot was taken.
    pub author: Option<MemberId>,
    pub editor: Option<MemberId>,
    pub created_at: DateTime<Utc>,
}

/// A tenant as seen by the cleanup cycle.
#[derive(Debug, Clone)]
pub struct TenantInfo {
    pub id: TenantId,
    pub demo_mode: bool,
    pub definition: Arc<AppDefinition>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Contracts
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistence operations on resource rows.
///
/// Every method is independently idempotent or append-only, so an interrupted
/// cleanup cycle can simply be run again.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Delete every ephemeral record of `tenant`, returning the count.
    async fn delete_ephemeral(&self, tenant: TenantId) -> Result<u64>;

    /// Every seed record of `tenant`, in id order.
    async fn list_seed(&self, tenant: TenantId) -> Result<Vec<ResourceRecord>>;

    async fn insert(&self, resource: NewResource) -> Result<ResourceRecord>;

    /// Delete non-seed records of `tenant` whose `expires` lies before `now`.
    async fn delete_expired(&self, tenant: TenantId, now: DateTime<Utc>) -> Result<u64>;

    async fn get(&self, tenant: TenantId, id: ResourceId) -> Result<Option<ResourceRecord>>;

    /// Apply `update`, first writing `version` from the current data when given.
    ///
    /// Both writes happen atomically.
    async fn update(
        &self,
        tenant: TenantId,
        id: ResourceId,
        update: ResourceUpdate,
        version: Option<NewVersion>,
    ) -> Result<ResourceRecord>;

    /// Versions of one record, in no particular order.
    async fn versions(&self, tenant: TenantId, id: ResourceId) -> Result<Vec<ResourceVersion>>;

    /// Records of one type inside `scope`.
    async fn list(
        &self,
        tenant: TenantId,
        resource_type: &str,
        scope: &ScopeFilter,
    ) -> Result<Vec<ResourceRecord>>;
}

/// Source of the tenant list for a cleanup cycle.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<TenantInfo>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct StoreState {
    next_id: i64,
    next_version_id: i64,
    records: BTreeMap<ResourceId, ResourceRecord>,
    versions: Vec<ResourceVersion>,
    tenants: Vec<TenantInfo>,
}

impl StoreState {
    fn remove_where(&mut self, predicate: impl Fn(&ResourceRecord) -> bool) -> u64 {
        let doomed: Vec<ResourceId> = self
            .records
            .values()
            .filter(|r| predicate(r))
            .map(|r| r.id)
            .collect();

        for id in &doomed {
            self.records.remove(id);
        }
        self.versions.retain(|v| !doomed.contains(&v.resource_id));
        doomed.len() as u64
    }
}

/// Thread-safe store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    state: Mutex<StoreState>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant for [`TenantDirectory::list_tenants`].
    pub fn add_tenant(&self, id: TenantId, demo_mode: bool, definition: AppDefinition) {
        let mut state = self.state.lock();
        state.tenants.retain(|t| t.id != id);
        state.tenants.push(TenantInfo {
            id,
            demo_mode,
            definition: Arc::new(definition),
        });
    }

    /// Every record of `tenant`, in id order.
    pub fn records(&self, tenant: TenantId) -> Vec<ResourceRecord> {
        self.state
            .lock()
            .records
            .values()
            .filter(|r| r.tenant == tenant)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn delete_ephemeral(&self, tenant: TenantId) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .remove_where(|r| r.tenant == tenant && r.ephemeral))
    }

    async fn list_seed(&self, tenant: TenantId) -> Result<Vec<ResourceRecord>> {
        Ok(self
            .state
            .lock()
            .records
            .values()
            .filter(|r| r.tenant == tenant && r.seed)
            .cloned()
            .collect())
    }

    async fn insert(&self, resource: NewResource) -> Result<ResourceRecord> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let now = Utc::now();
        let record = ResourceRecord {
            id: ResourceId(state.next_id),
            tenant: resource.tenant,
            resource_type: resource.resource_type,
            data: resource.data,
            author: resource.author,
            editor: None,
            seed: resource.seed,
            ephemeral: resource.ephemeral,
            expires: resource.expires,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_expired(&self, tenant: TenantId, now: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .remove_where(|r| r.tenant == tenant && r.is_expired(now)))
    }

    async fn get(&self, tenant: TenantId, id: ResourceId) -> Result<Option<ResourceRecord>> {
        Ok(self
            .state
            .lock()
            .records
            .get(&id)
            .filter(|r| r.tenant == tenant)
            .cloned())
    }

    async fn update(
        &self,
        tenant: TenantId,
        id: ResourceId,
        update: ResourceUpdate,
        version: Option<NewVersion>,
    ) -> Result<ResourceRecord> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let (previous, author) = match state.records.get(&id) {
            Some(record) if record.tenant == tenant => (record.data.clone(), record.author.clone()),
            _ => return Err(AppguardError::not_found("Resource", id.to_string())),
        };

        if let Some(version) = version {
            state.next_version_id += 1;
            let snapshot = ResourceVersion {
                id: state.next_version_id,
                resource_id: id,
                data: version.capture_data.then_some(previous),
                author,
                editor: version.editor,
                created_at: now,
            };
            state.versions.push(snapshot);
        }

        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| AppguardError::not_found("Resource", id.to_string()))?;
        record.data = update.data;
        record.editor = update.editor;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn versions(&self, tenant: TenantId, id: ResourceId) -> Result<Vec<ResourceVersion>> {
        let state = self.state.lock();
        if !state.records.get(&id).is_some_and(|r| r.tenant == tenant) {
            return Ok(Vec::new());
        }
        Ok(state
            .versions
            .iter()
            .filter(|v| v.resource_id == id)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        tenant: TenantId,
        resource_type: &str,
        scope: &ScopeFilter,
    ) -> Result<Vec<ResourceRecord>> {
        Ok(self
            .state
            .lock()
            .records
            .values()
            .filter(|r| r.tenant == tenant && r.resource_type == resource_type)
            .filter(|r| scope.permits(r.author.as_ref()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TenantDirectory for InMemoryResourceStore {
    async fn list_tenants(&self) -> Result<Vec<TenantInfo>> {
        Ok(self.state.lock().tenants.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::rbac::{Denial, ScopePredicate};
    use chrono::Duration;
    use serde_json::json;

    const APP: TenantId = TenantId(1);

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryResourceStore::new();
        let record = store
            .insert(NewResource::new(APP, "note", json!({"title": "a"})).with_author("alice"))
            .await
            .unwrap();

        let fetched = store.get(APP, record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert!(store.get(TenantId(2), record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired_spares_seeds_and_live_records() {
        let store = InMemoryResourceStore::new();
        let now = Utc::now();
        let past = now - Duration::hours(1);

        store.insert(NewResource::new(APP, "note", json!({})).expires_at(past)).await.unwrap();
        store
            .insert(NewResource::new(APP, "note", json!({})).as_seed().expires_at(past))
            .await
            .unwrap();
        store
            .insert(NewResource::new(APP, "note", json!({})).expires_at(now + Duration::hours(1)))
            .await
            .unwrap();
        store.insert(NewResource::new(APP, "note", json!({}))).await.unwrap();

        assert_eq!(store.delete_expired(APP, now).await.unwrap(), 1);
        assert_eq!(store.records(APP).len(), 3);
    }

    #[tokio::test]
    async fn test_delete_ephemeral_cascades_versions() {
        let store = InMemoryResourceStore::new();
        let record = store
            .insert(NewResource::new(APP, "note", json!({"v": 1})).as_ephemeral())
            .await
            .unwrap();
        store
            .update(
                APP,
                record.id,
                ResourceUpdate {
                    data: json!({"v": 2}),
                    editor: None,
                },
                Some(NewVersion {
                    capture_data: true,
                    editor: None,
                }),
            )
            .await
            .unwrap();

        assert_eq!(store.delete_ephemeral(APP).await.unwrap(), 1);
        assert!(store.state.lock().versions.is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let store = InMemoryResourceStore::new();
        let err = store
            .update(
                APP,
                ResourceId(99),
                ResourceUpdate {
                    data: json!({}),
                    editor: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_list_applies_scope() {
        let store = InMemoryResourceStore::new();
        store
            .insert(NewResource::new(APP, "note", json!({})).with_author("alice"))
            .await
            .unwrap();
        store
            .insert(NewResource::new(APP, "note", json!({})).with_author("bob"))
            .await
            .unwrap();
        store.insert(NewResource::new(APP, "task", json!({}))).await.unwrap();

        let all = store.list(APP, "note", &ScopeFilter::Allow).await.unwrap();
        assert_eq!(all.len(), 2);

        let own = store
            .list(
                APP,
                "note",
                &ScopeFilter::AllowIf(vec![ScopePredicate::OwnedByAuthor("bob".into())]),
            )
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].author, Some(MemberId::new("bob")));

        let none = store
            .list(APP, "note", &ScopeFilter::Deny(Denial::ActionPrivate))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_tenant_directory() {
        let store = InMemoryResourceStore::new();
        store.add_tenant(APP, true, AppDefinition::default());
        store.add_tenant(APP, false, AppDefinition::default());
        let tenants = store.list_tenants().await.unwrap();
        assert_eq!(tenants.len(), 1);
        assert!(!tenants[0].demo_mode);
    }
}
