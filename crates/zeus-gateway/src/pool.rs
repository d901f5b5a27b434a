//! Provider pools: the selection sets for load balancing.
//!
//! One ordered slice of healthy worker ids per provider, recomputed from the
//! registry on every lifecycle or health transition. Selection picks
//! uniformly at random: no shared counter under concurrency, uniform load in
//! steady state.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::seq::SliceRandom;

use crate::registry::WorkerRegistry;
use zeus_core::WorkerId;

/// Per-provider sets of selectable workers.
#[derive(Default)]
pub struct ProviderPools {
    pools: RwLock<HashMap<String, Vec<WorkerId>>>,
}

impl ProviderPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild one provider's pool from the registry.
    pub fn recompute(&self, registry: &WorkerRegistry, provider: &str) {
        let ids: Vec<WorkerId> = registry
            .healthy(provider)
            .into_iter()
            .map(|w| w.id)
            .collect();
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        if ids.is_empty() {
            pools.remove(provider);
        } else {
            pools.insert(provider.to_string(), ids);
        }
    }

    /// Pick a worker uniformly at random; `None` if the pool is empty.
    pub fn select(&self, provider: &str) -> Option<WorkerId> {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools
            .get(provider)?
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Current pool membership, for introspection.
    pub fn members(&self, provider: &str) -> Vec<WorkerId> {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools.get(provider).cloned().unwrap_or_default()
    }

    /// Healthy count for a provider.
    pub fn healthy_count(&self, provider: &str) -> usize {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools.get(provider).map(Vec::len).unwrap_or(0)
    }
}
