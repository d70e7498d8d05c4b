//! Integration tests for versioning, the cleanup cycle and its scheduling.

use std::sync::Arc;
use std::time::Duration;

use appguard_core::jobs::{DemoCleanupJob, IntervalSchedule, JobScheduler, JobStatus};
use appguard_core::lifecycle::{
    history, record_update, run_cycle, InMemoryResourceStore, NewResource, NewVersion,
    ResourceRecord, ResourceStore, ResourceUpdate, ResourceVersion, TenantDirectory,
};
use appguard_core::rbac::{
    AccessRequest, Action, AppDefinition, Caller, FunctionalRole, HistoryPolicy,
    InMemoryMembershipDirectory, MemberId, PolicyEngine, ResourceDefinition, ResourceId,
    ScopeFilter, TenantId,
};
use appguard_core::{AppguardError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

const DEMO: TenantId = TenantId(1);
const LIVE: TenantId = TenantId(2);
const BROKEN: TenantId = TenantId(3);

fn definition() -> AppDefinition {
    let mut task = ResourceDefinition::default()
        .with_roles(vec![FunctionalRole::Author.into()])
        .with_reference("projectId", "project");
    task.expires = Some(Duration::from_secs(3600));
    task.history = HistoryPolicy::Enabled(true);

    AppDefinition::default()
        .with_resource("project", ResourceDefinition::default())
        .with_resource("task", task)
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn ephemeral(store: &InMemoryResourceStore, tenant: TenantId, resource_type: &str) -> Vec<ResourceRecord> {
    store
        .records(tenant)
        .into_iter()
        .filter(|r| r.ephemeral && r.resource_type == resource_type)
        .collect()
}

/// A seed project and a seed task pointing at it.
async fn seed_demo(store: &InMemoryResourceStore) -> (ResourceId, ResourceId) {
    store.add_tenant(DEMO, true, definition());
    let project = store
        .insert(NewResource::new(DEMO, "project", json!({"name": "Launch"})).as_seed())
        .await
        .unwrap();
    let task = store
        .insert(
            NewResource::new(DEMO, "task", json!({"title": "Ship", "projectId": project.id.get()}))
                .with_author("demo-user")
                .as_seed(),
        )
        .await
        .unwrap();
    (project.id, task.id)
}

#[tokio::test]
async fn test_reseed_repoints_child_to_new_parent() {
    let store = InMemoryResourceStore::new();
    let (seed_project, seed_task) = seed_demo(&store).await;

    let tenants = store.list_tenants().await.unwrap();
    let report = run_cycle(&store, &tenants, at(0)).await;
    assert!(report.is_clean());
    assert_eq!(report.reseeded, 2);

    let projects = ephemeral(&store, DEMO, "project");
    let tasks = ephemeral(&store, DEMO, "task");
    assert_eq!(projects.len(), 1);
    assert_eq!(tasks.len(), 1);

    let new_project = projects[0].id;
    assert_ne!(new_project, seed_project);
    assert_eq!(tasks[0].data["projectId"], json!(new_project.get()));
    assert_eq!(tasks[0].data["title"], json!("Ship"));
    assert_eq!(tasks[0].author, Some(MemberId::new("demo-user")));
    assert_eq!(tasks[0].expires, Some(at(3600)));

    // Seeds are untouched.
    let seed = store.get(DEMO, seed_task).await.unwrap().unwrap();
    assert!(seed.seed);
    assert_eq!(seed.data["projectId"], json!(seed_project.get()));
}

#[tokio::test]
async fn test_repeated_cycles_replace_copies() {
    let store = InMemoryResourceStore::new();
    seed_demo(&store).await;
    let tenants = store.list_tenants().await.unwrap();

    run_cycle(&store, &tenants, at(0)).await;
    let first = ephemeral(&store, DEMO, "project")[0].id;

    let report = run_cycle(&store, &tenants, at(60)).await;
    assert_eq!(report.ephemeral_deleted, 2);
    assert_eq!(report.reseeded, 2);

    let projects = ephemeral(&store, DEMO, "project");
    let tasks = ephemeral(&store, DEMO, "task");
    assert_eq!(projects.len(), 1);
    assert_eq!(tasks.len(), 1);
    assert_ne!(projects[0].id, first);
    assert_eq!(tasks[0].data["projectId"], json!(projects[0].id.get()));
}

#[tokio::test]
async fn test_non_demo_tenant_cleanup() {
    let store = InMemoryResourceStore::new();
    store.add_tenant(LIVE, false, definition());

    let orphan = store
        .insert(NewResource::new(LIVE, "task", json!({})).as_ephemeral())
        .await
        .unwrap();
    let expired = store
        .insert(NewResource::new(LIVE, "task", json!({})).expires_at(at(-1)))
        .await
        .unwrap();
    let live = store
        .insert(NewResource::new(LIVE, "task", json!({})).expires_at(at(1)))
        .await
        .unwrap();
    let seed = store
        .insert(NewResource::new(LIVE, "project", json!({})).as_seed().expires_at(at(-1)))
        .await
        .unwrap();
    let plain = store
        .insert(NewResource::new(LIVE, "project", json!({})))
        .await
        .unwrap();

    let tenants = store.list_tenants().await.unwrap();
    let report = run_cycle(&store, &tenants, at(0)).await;
    assert_eq!(report.ephemeral_deleted, 1);
    assert_eq!(report.expired_deleted, 1);
    assert_eq!(report.reseeded, 0);

    let remaining: Vec<ResourceId> = store.records(LIVE).iter().map(|r| r.id).collect();
    assert_eq!(remaining, vec![live.id, seed.id, plain.id]);
    assert!(!remaining.contains(&orphan.id));
    assert!(!remaining.contains(&expired.id));
}

#[tokio::test]
async fn test_history_is_newest_first() {
    let store = InMemoryResourceStore::new();
    let definition = definition();
    let task = store
        .insert(NewResource::new(LIVE, "task", json!({"title": "v1"})).with_author("alice"))
        .await
        .unwrap();

    record_update(&store, &definition, LIVE, task.id, json!({"title": "v2"}), Some("alice".into()))
        .await
        .unwrap();
    record_update(&store, &definition, LIVE, task.id, json!({"title": "v3"}), Some("bob".into()))
        .await
        .unwrap();

    let entries = history(&store, &definition, LIVE, task.id).await.unwrap();
    let titles: Vec<_> = entries
        .iter()
        .map(|e| e.data.as_ref().map(|d| d["title"].clone()))
        .collect();
    assert_eq!(titles, vec![Some(json!("v2")), Some(json!("v1"))]);
    assert_eq!(entries[0].author, Some(MemberId::new("bob")));
    assert_eq!(entries[1].author, Some(MemberId::new("alice")));
}

#[tokio::test]
async fn test_scheduler_runs_cleanup_with_injected_now() {
    let store = Arc::new(InMemoryResourceStore::new());
    seed_demo(&store).await;

    let scheduler = JobScheduler::new();
    let job = Arc::new(DemoCleanupJob::new(store.clone(), store.clone()));
    scheduler
        .schedule_interval(
            job,
            IntervalSchedule::new(Duration::from_secs(600)).with_immediate(),
            at(0),
        )
        .await;

    let runs = scheduler.tick(at(5)).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, JobStatus::Completed);

    let tasks = ephemeral(&store, DEMO, "task");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].expires, Some(at(3605)));

    // Not due again until a full interval later.
    assert!(scheduler.tick(at(600)).await.is_empty());
    assert_eq!(scheduler.tick(at(605)).await.len(), 1);
}

#[tokio::test]
async fn test_scoped_listing_follows_policy() {
    let store = InMemoryResourceStore::new();
    for author in ["alice", "bob", "alice"] {
        store
            .insert(NewResource::new(LIVE, "task", json!({})).with_author(author))
            .await
            .unwrap();
    }

    let engine = PolicyEngine::new(Arc::new(InMemoryMembershipDirectory::new()));
    engine.load_definition(LIVE, definition());
    let scope = engine
        .enforce(&AccessRequest::new(LIVE, "task", Action::Query), &Caller::member("alice"))
        .await
        .unwrap();

    let visible = store.list(LIVE, "task", &scope).await.unwrap();
    assert_eq!(visible.len(), 2);
    assert!(visible
        .iter()
        .all(|r| r.author == Some(MemberId::new("alice"))));
}

/// Store whose deletes fail for one tenant.
struct PartitionedStore {
    inner: InMemoryResourceStore,
    broken: TenantId,
}

impl PartitionedStore {
    fn check(&self, tenant: TenantId) -> Result<()> {
        if tenant == self.broken {
            Err(AppguardError::internal("partition unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ResourceStore for PartitionedStore {
    async fn delete_ephemeral(&self, tenant: TenantId) -> Result<u64> {
        self.check(tenant)?;
        self.inner.delete_ephemeral(tenant).await
    }

    async fn list_seed(&self, tenant: TenantId) -> Result<Vec<ResourceRecord>> {
        self.inner.list_seed(tenant).await
    }

    async fn insert(&self, resource: NewResource) -> Result<ResourceRecord> {
        self.inner.insert(resource).await
    }

    async fn delete_expired(&self, tenant: TenantId, now: DateTime<Utc>) -> Result<u64> {
        self.check(tenant)?;
        self.inner.delete_expired(tenant, now).await
    }

    async fn get(&self, tenant: TenantId, id: ResourceId) -> Result<Option<ResourceRecord>> {
        self.inner.get(tenant, id).await
    }

    async fn update(
        &self,
        tenant: TenantId,
        id: ResourceId,
        update: ResourceUpdate,
        version: Option<NewVersion>,
    ) -> Result<ResourceRecord> {
        self.inner.update(tenant, id, update, version).await
    }

    async fn versions(&self, tenant: TenantId, id: ResourceId) -> Result<Vec<ResourceVersion>> {
        self.inner.versions(tenant, id).await
    }

    async fn list(
        &self,
        tenant: TenantId,
        resource_type: &str,
        scope: &ScopeFilter,
    ) -> Result<Vec<ResourceRecord>> {
        self.inner.list(tenant, resource_type, scope).await
    }
}

#[tokio::test]
async fn test_failing_tenant_does_not_stop_cycle() {
    let store = PartitionedStore {
        inner: InMemoryResourceStore::new(),
        broken: BROKEN,
    };
    seed_demo(&store.inner).await;
    store.inner.add_tenant(BROKEN, false, definition());
    store.inner.add_tenant(LIVE, false, definition());
    for tenant in [BROKEN, LIVE] {
        store
            .insert(NewResource::new(tenant, "task", json!({})).as_ephemeral())
            .await
            .unwrap();
    }

    let mut tenants = store.inner.list_tenants().await.unwrap();
    tenants.sort_by_key(|t| t.id);
    let report = run_cycle(&store, &tenants, at(0)).await;

    assert_eq!(report.tenants, 3);
    assert_eq!(report.failed_tenants, vec![BROKEN]);
    assert_eq!(report.reseeded, 2);
    assert_eq!(report.ephemeral_deleted, 1);
    assert_eq!(ephemeral(&store.inner, DEMO, "project").len(), 1);
    assert!(store.inner.records(LIVE).is_empty());
    assert_eq!(store.inner.records(BROKEN).len(), 1);
}
