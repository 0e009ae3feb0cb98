/// Per-node share computation for pool sizes and XA transaction limits
///
/// Every node of the cluster derives its own share of the configured
/// cluster-wide originals from the current healthy-node count. Updates
/// recompute from the stored originals each time rather than adjusting
/// incrementally, so repeated or reordered reports converge on the same
/// values.
use crate::core::ConnectionGroupKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ceiling division; shares round up so the cluster never under-provisions
fn ceil_div(value: u32, parts: u32) -> u32 {
    if parts == 0 {
        return value;
    }
    value.div_ceil(parts)
}

/// Per-node share of a connection group's pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAllocation {
    pub group: ConnectionGroupKey,
    pub original_max: u32,
    pub original_min: u32,
    pub total_nodes: u32,
    pub healthy_nodes: u32,
    pub current_max: u32,
    pub current_min: u32,
}

impl PoolAllocation {
    fn recompute(&mut self) {
        self.current_max = ceil_div(self.original_max, self.healthy_nodes);
        self.current_min = ceil_div(self.original_min, self.healthy_nodes);
        debug_assert!(self.current_min <= self.current_max);
    }
}

/// Per-node share of a connection group's concurrent-XA-transaction limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XaAllocation {
    pub group: ConnectionGroupKey,
    pub original_limit: u32,
    pub total_nodes: u32,
    pub healthy_nodes: u32,
    pub current_limit: u32,
}

impl XaAllocation {
    fn recompute(&mut self) {
        self.current_limit = ceil_div(self.original_limit, self.healthy_nodes);
    }
}

fn clamp_healthy(count: u32, total: u32) -> u32 {
    count.clamp(1, total.max(1))
}

/// Computes and stores per-node pool shares for each connection group
pub struct PoolAllocationCoordinator {
    allocations: Arc<RwLock<HashMap<ConnectionGroupKey, PoolAllocation>>>,
}

impl PoolAllocationCoordinator {
    pub fn new() -> Self {
        Self {
            allocations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create (or replace) the allocation for a group. An empty node list
    /// means single-node mode.
    pub async fn allocate(
        &self,
        group: &ConnectionGroupKey,
        original_max: u32,
        original_min: u32,
        nodes: &[String],
    ) -> PoolAllocation {
        let total = nodes.len().max(1) as u32;
        let mut allocation = PoolAllocation {
            group: group.clone(),
            original_max,
            original_min,
            total_nodes: total,
            healthy_nodes: total,
            current_max: 0,
            current_min: 0,
        };
        allocation.recompute();

        let mut allocations = self.allocations.write().await;
        allocations.insert(group.clone(), allocation.clone());
        allocation
    }

    /// Recompute the group's share for a new healthy-node count, clamped to
    /// `[1, total_nodes]`. Returns None when the group has no allocation.
    pub async fn update_healthy_nodes(
        &self,
        group: &ConnectionGroupKey,
        healthy: u32,
    ) -> Option<PoolAllocation> {
        let mut allocations = self.allocations.write().await;
        let allocation = allocations.get_mut(group)?;
        allocation.healthy_nodes = clamp_healthy(healthy, allocation.total_nodes);
        allocation.recompute();
        Some(allocation.clone())
    }

    pub async fn get(&self, group: &ConnectionGroupKey) -> Option<PoolAllocation> {
        let allocations = self.allocations.read().await;
        allocations.get(group).cloned()
    }

    /// Drop stored state for a group (logical-group teardown)
    pub async fn remove(&self, group: &ConnectionGroupKey) -> Option<PoolAllocation> {
        let mut allocations = self.allocations.write().await;
        allocations.remove(group)
    }
}

impl Default for PoolAllocationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes and stores per-node XA transaction limits for each connection
/// group; structurally the pool coordinator over a single dimension.
pub struct XaAllocationCoordinator {
    allocations: Arc<RwLock<HashMap<ConnectionGroupKey, XaAllocation>>>,
}

impl XaAllocationCoordinator {
    pub fn new() -> Self {
        Self {
            allocations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn allocate(
        &self,
        group: &ConnectionGroupKey,
        original_limit: u32,
        nodes: &[String],
    ) -> XaAllocation {
        let total = nodes.len().max(1) as u32;
        let mut allocation = XaAllocation {
            group: group.clone(),
            original_limit,
            total_nodes: total,
            healthy_nodes: total,
            current_limit: 0,
        };
        allocation.recompute();

        let mut allocations = self.allocations.write().await;
        allocations.insert(group.clone(), allocation.clone());
        allocation
    }

    pub async fn update_healthy_nodes(
        &self,
        group: &ConnectionGroupKey,
        healthy: u32,
    ) -> Option<XaAllocation> {
        let mut allocations = self.allocations.write().await;
        let allocation = allocations.get_mut(group)?;
        allocation.healthy_nodes = clamp_healthy(healthy, allocation.total_nodes);
        allocation.recompute();
        Some(allocation.clone())
    }

    pub async fn get(&self, group: &ConnectionGroupKey) -> Option<XaAllocation> {
        let allocations = self.allocations.read().await;
        allocations.get(group).cloned()
    }

    pub async fn remove(&self, group: &ConnectionGroupKey) -> Option<XaAllocation> {
        let mut allocations = self.allocations.write().await;
        allocations.remove(group)
    }
}

impl Default for XaAllocationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
