//! Per-enforcer slots holding resolved enforcers
//!
//! Slots live in a sharded map so tenants never contend on one lock. A slot's
//! write lock doubles as the serialization point for syncs of that enforcer.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::resolver::ResolvedEnforcer;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnforcerKey {
    pub tenant_id: String,
    pub enforcer_id: String,
}

impl EnforcerKey {
    pub fn new(tenant_id: &str, enforcer_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            enforcer_id: enforcer_id.to_string(),
        }
    }
}

pub type EnforcerSlot = Arc<RwLock<Option<ResolvedEnforcer>>>;

#[derive(Default)]
pub struct EnforcerCache {
    slots: DashMap<EnforcerKey, EnforcerSlot>,
}

impl EnforcerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for an enforcer, created empty on first use
    pub fn slot(&self, tenant_id: &str, enforcer_id: &str) -> EnforcerSlot {
        self.slots
            .entry(EnforcerKey::new(tenant_id, enforcer_id))
            .or_default()
            .clone()
    }

    /// Drop the handle cached for one enforcer
    pub async fn invalidate(&self, tenant_id: &str, enforcer_id: &str) {
        let slot = self
            .slots
            .get(&EnforcerKey::new(tenant_id, enforcer_id))
            .map(|slot| slot.clone());
        if let Some(slot) = slot {
            slot.write().await.take();
            debug!(tenant = tenant_id, enforcer = enforcer_id, "enforcer cache entry dropped");
        }
    }

    /// Drop the handle and forget the slot of a deleted enforcer
    pub async fn evict(&self, tenant_id: &str, enforcer_id: &str) {
        self.invalidate(tenant_id, enforcer_id).await;
        self.slots.remove(&EnforcerKey::new(tenant_id, enforcer_id));
    }

    /// Drop every handle of the tenant built from `model_id`
    pub async fn invalidate_model(&self, tenant_id: &str, model_id: &str) -> usize {
        self.invalidate_where(tenant_id, |_, resolved| resolved.model_id == model_id)
            .await
    }

    /// Drop every handle of the tenant built from `adapter_id`
    pub async fn invalidate_adapter(&self, tenant_id: &str, adapter_id: &str) -> usize {
        self.invalidate_where(tenant_id, |_, resolved| resolved.adapter_id == adapter_id)
            .await
    }

    /// Drop every other handle of the tenant reading the physical store `store`.
    /// The caller must not hold any slot lock.
    pub async fn invalidate_store(&self, tenant_id: &str, writer: &str, store: &str) -> usize {
        self.invalidate_where(tenant_id, |key, resolved| {
            key.enforcer_id != writer && resolved.store == store
        })
        .await
    }

    async fn invalidate_where<F>(&self, tenant_id: &str, stale: F) -> usize
    where
        F: Fn(&EnforcerKey, &ResolvedEnforcer) -> bool,
    {
        // Shard guards must not be held across the awaits below
        let slots: Vec<(EnforcerKey, EnforcerSlot)> = self
            .slots
            .iter()
            .filter(|entry| entry.key().tenant_id == tenant_id)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut dropped = 0;
        for (key, slot) in slots {
            let mut guard = slot.write().await;
            if guard.as_ref().is_some_and(|resolved| stale(&key, resolved)) {
                guard.take();
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(tenant = tenant_id, dropped, "enforcer cache entries dropped");
        }
        dropped
    }

    /// Number of enforcers currently holding a resolved handle
    pub async fn cached(&self) -> usize {
        let slots: Vec<EnforcerSlot> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut count = 0;
        for slot in slots {
            if slot.read().await.is_some() {
                count += 1;
            }
        }
        count
    }
}
