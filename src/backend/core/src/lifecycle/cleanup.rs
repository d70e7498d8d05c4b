//! Demo cleanup and reseed cycle.
//!
//! For every tenant, one cycle:
//!
//! - **Demo tenants**: deletes all ephemeral records, then recreates an
//!   ephemeral copy of every seed record. References between seeds are
//!   re-pointed at the new copies, so parents are copied before children.
//! - **Other tenants**: deletes ephemeral records (orphans) and non-seed
//!   records whose `expires` has passed.
//!
//! Seed records and live records are never touched. The cycle takes `now`
//! and the tenant list as arguments and keeps no state between runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::store::{NewResource, ResourceRecord, ResourceStore, TenantInfo};
use crate::error::Result;
use crate::rbac::{AppDefinition, ResourceId, TenantId};
use crate::telemetry::LifecycleMetrics;

/// Row counts of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub tenants: usize,
    pub ephemeral_deleted: u64,
    pub expired_deleted: u64,
    pub reseeded: u64,
    /// Tenants skipped because of an error; the next cycle retries them.
    pub failed_tenants: Vec<TenantId>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failed_tenants.is_empty()
    }
}

#[derive(Debug, Default)]
struct TenantCounts {
    ephemeral_deleted: u64,
    expired_deleted: u64,
    reseeded: u64,
}

/// Run one cleanup cycle over `tenants`.
///
/// A failing tenant is logged and skipped; it never aborts the cycle.
#[instrument(skip(store, tenants, now), fields(tenants = tenants.len(), now = %now))]
pub async fn run_cycle(
    store: &dyn ResourceStore,
    tenants: &[TenantInfo],
    now: DateTime<Utc>,
) -> CycleReport {
    let started = Instant::now();
    let mut report = CycleReport {
        tenants: tenants.len(),
        ..Default::default()
    };

    for tenant in tenants {
        match cleanup_tenant(store, tenant, now).await {
            Ok(counts) => {
                debug!(
                    tenant = %tenant.id,
                    demo = tenant.demo_mode,
                    ephemeral_deleted = counts.ephemeral_deleted,
                    expired_deleted = counts.expired_deleted,
                    reseeded = counts.reseeded,
                    "Tenant cleaned up"
                );
                report.ephemeral_deleted += counts.ephemeral_deleted;
                report.expired_deleted += counts.expired_deleted;
                report.reseeded += counts.reseeded;
            }
            Err(e) => {
                warn!(tenant = %tenant.id, error = %e, "Cleanup failed for tenant");
                LifecycleMetrics::record_tenant_failure();
                report.failed_tenants.push(tenant.id);
            }
        }
    }

    LifecycleMetrics::record_rows("ephemeral_deleted", report.ephemeral_deleted);
    LifecycleMetrics::record_rows("expired_deleted", report.expired_deleted);
    LifecycleMetrics::record_rows("reseeded", report.reseeded);
    LifecycleMetrics::record_cycle_duration(started.elapsed().as_secs_f64());

    info!(
        tenants = report.tenants,
        ephemeral_deleted = report.ephemeral_deleted,
        expired_deleted = report.expired_deleted,
        reseeded = report.reseeded,
        failed = report.failed_tenants.len(),
        "Cleanup cycle finished"
    );

    report
}

async fn cleanup_tenant(
    store: &dyn ResourceStore,
    tenant: &TenantInfo,
    now: DateTime<Utc>,
) -> Result<TenantCounts> {
    let mut counts = TenantCounts {
        ephemeral_deleted: store.delete_ephemeral(tenant.id).await?,
        ..Default::default()
    };

    if tenant.demo_mode {
        counts.reseeded = reseed(store, tenant, now).await?;
    } else {
        counts.expired_deleted = store.delete_expired(tenant.id, now).await?;
    }

    Ok(counts)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reseed
// ═══════════════════════════════════════════════════════════════════════════════

/// Recreate ephemeral copies of every seed of `tenant`, returning the count.
async fn reseed(store: &dyn ResourceStore, tenant: &TenantInfo, now: DateTime<Utc>) -> Result<u64> {
    let seeds = store.list_seed(tenant.id).await?;
    let seed_ids: HashSet<ResourceId> = seeds.iter().map(|s| s.id).collect();
    let order = reseed_order(&tenant.definition, &seeds);

    // Seed id -> id of its fresh ephemeral copy.
    let mut copies: HashMap<ResourceId, ResourceId> = HashMap::with_capacity(seeds.len());

    for index in order {
        let seed = &seeds[index];
        let mut data = seed.data.clone();

        for (field, parent) in references(&tenant.definition, seed) {
            match copies.get(&parent) {
                Some(copy) => {
                    if let Some(slot) = data.get_mut(field) {
                        *slot = Value::from(copy.get());
                    }
                }
                None if seed_ids.contains(&parent) => warn!(
                    tenant = %tenant.id,
                    resource = %seed.id,
                    field,
                    parent = %parent,
                    "Seed reference cycle; copy keeps its original reference"
                ),
                // Points at a regular record, which stays valid.
                None => {}
            }
        }

        let expires = tenant
            .definition
            .resource(&seed.resource_type)
            .and_then(|resource| resource.expires)
            .and_then(|lifetime| chrono::Duration::from_std(lifetime).ok())
            .and_then(|lifetime| now.checked_add_signed(lifetime));

        let copy = store
            .insert(NewResource {
                tenant: tenant.id,
                resource_type: seed.resource_type.clone(),
                data,
                author: seed.author.clone(),
                seed: false,
                ephemeral: true,
                expires,
            })
            .await?;
        copies.insert(seed.id, copy.id);
    }

    Ok(copies.len() as u64)
}

/// Referencing fields of `record` with the id they point at, in field order.
fn references<'a>(definition: &'a AppDefinition, record: &ResourceRecord) -> Vec<(&'a str, ResourceId)> {
    let Some(resource) = definition.resource(&record.resource_type) else {
        return Vec::new();
    };

    let mut fields: Vec<(&str, ResourceId)> = resource
        .references
        .keys()
        .filter_map(|field| {
            record
                .data
                .get(field)
                .and_then(Value::as_i64)
                .map(|id| (field.as_str(), ResourceId(id)))
        })
        .collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    fields
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Pending,
    InProgress,
    Done,
}

/// Seed indices ordered so that every parent precedes its children.
///
/// Seeds on a reference cycle are ordered arbitrarily within the cycle.
fn reseed_order(definition: &AppDefinition, seeds: &[ResourceRecord]) -> Vec<usize> {
    let index: HashMap<ResourceId, usize> =
        seeds.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
    let mut state = vec![Visit::Pending; seeds.len()];
    let mut order = Vec::with_capacity(seeds.len());

    fn visit(
        i: usize,
        definition: &AppDefinition,
        seeds: &[ResourceRecord],
        index: &HashMap<ResourceId, usize>,
        state: &mut [Visit],
        order: &mut Vec<usize>,
    ) {
        if state[i] != Visit::Pending {
            return;
        }
        state[i] = Visit::InProgress;

        for (_, parent) in references(definition, &seeds[i]) {
            if let Some(&p) = index.get(&parent) {
                visit(p, definition, seeds, index, state, order);
            }
        }

        state[i] = Visit::Done;
        order.push(i);
    }

    for i in 0..seeds.len() {
        visit(i, definition, seeds, &index, &mut state, &mut order);
    }
    order
}
