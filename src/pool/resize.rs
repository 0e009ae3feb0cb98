/// Applies computed allocations to a live connection pool
use crate::core::ConnectionGroupKey;
use crate::error::PasarelaResult;
use crate::pool::allocation::{PoolAllocation, PoolAllocationCoordinator};
use crate::pool::PooledConnections;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mutates a group's live pool toward its current allocation.
///
/// All resizes for one group run under a per-group lock, created lazily and
/// never shared across groups, so two racing appliers cannot interleave
/// their size changes. Applying the same allocation twice is a no-op.
pub struct PoolResizer {
    coordinator: Arc<PoolAllocationCoordinator>,
    group_locks: Mutex<HashMap<ConnectionGroupKey, Arc<Mutex<()>>>>,
}

impl PoolResizer {
    pub fn new(coordinator: Arc<PoolAllocationCoordinator>) -> Self {
        Self {
            coordinator,
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, group: &ConnectionGroupKey) -> Arc<Mutex<()>> {
        let mut locks = self.group_locks.lock().await;
        locks
            .entry(group.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply the group's current allocation to `pool`. No-op when the group
    /// has no allocation (logged, not an error) or when the pool already
    /// matches the target.
    pub async fn apply_resize(
        &self,
        group: &ConnectionGroupKey,
        pool: &dyn PooledConnections,
    ) -> PasarelaResult<()> {
        let allocation = match self.coordinator.get(group).await {
            Some(allocation) => allocation,
            None => {
                tracing::debug!("resize skipped: no allocation for group {}", group);
                return Ok(());
            }
        };

        let lock = self.lock_for(group).await;
        let _guard = lock.lock().await;

        // Re-read under the lock so a racing applier's result is not undone
        let allocation = match self.coordinator.get(group).await {
            Some(allocation) => allocation,
            None => {
                tracing::debug!("resize skipped: allocation removed for group {}", group);
                return Ok(());
            }
        };

        self.apply_locked(&allocation, pool).await
    }

    async fn apply_locked(
        &self,
        allocation: &PoolAllocation,
        pool: &dyn PooledConnections,
    ) -> PasarelaResult<()> {
        let current_max = pool.max_size().await;
        let current_min = pool.min_idle().await;

        if current_max == allocation.current_max && current_min == allocation.current_min {
            tracing::debug!(
                "pool for group {} already at max={} min={}",
                allocation.group,
                current_max,
                current_min
            );
            return Ok(());
        }

        if allocation.current_max < current_max {
            // Shrinking: lower min-idle before max-size so min never exceeds
            // max in between, then evict idle connections above the new min
            pool.set_min_idle(allocation.current_min).await?;
            pool.set_max_size(allocation.current_max).await?;
            pool.evict_idle_above(allocation.current_min).await?;
        } else {
            // Growing: raise max-size before min-idle, same invariant
            pool.set_max_size(allocation.current_max).await?;
            pool.set_min_idle(allocation.current_min).await?;
        }

        tracing::info!(
            "resized pool for group {}: max {} -> {}, min {} -> {} ({}/{} nodes healthy)",
            allocation.group,
            current_max,
            allocation.current_max,
            current_min,
            allocation.current_min,
            allocation.healthy_nodes,
            allocation.total_nodes
        );
        Ok(())
    }

    /// Drop the per-group lock at teardown
    pub async fn remove_group(&self, group: &ConnectionGroupKey) {
        let mut locks = self.group_locks.lock().await;
        locks.remove(group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    /// Recording pool double: tracks configured sizes and the mutation log
    pub(crate) struct MockPool {
        state: AsyncMutex<MockPoolState>,
    }

    struct MockPoolState {
        max_size: u32,
        min_idle: u32,
        calls: Vec<String>,
    }

    impl MockPool {
        pub(crate) fn new(max_size: u32, min_idle: u32) -> Self {
            Self {
                state: AsyncMutex::new(MockPoolState {
                    max_size,
                    min_idle,
                    calls: Vec::new(),
                }),
            }
        }

        pub(crate) async fn calls(&self) -> Vec<String> {
            self.state.lock().await.calls.clone()
        }
    }

    #[async_trait]
    impl PooledConnections for MockPool {
        async fn max_size(&self) -> u32 {
            self.state.lock().await.max_size
        }

        async fn min_idle(&self) -> u32 {
            self.state.lock().await.min_idle
        }

        async fn set_max_size(&self, size: u32) -> PasarelaResult<()> {
            let mut state = self.state.lock().await;
            state.max_size = size;
            state.calls.push(format!("set_max({})", size));
            Ok(())
        }

        async fn set_min_idle(&self, size: u32) -> PasarelaResult<()> {
            let mut state = self.state.lock().await;
            state.min_idle = size;
            state.calls.push(format!("set_min({})", size));
            Ok(())
        }

        async fn evict_idle_above(&self, keep: u32) -> PasarelaResult<()> {
            let mut state = self.state.lock().await;
            state.calls.push(format!("evict_above({})", keep));
            Ok(())
        }
    }

    fn group(name: &str) -> ConnectionGroupKey {
        ConnectionGroupKey::from(name)
    }

    fn three_nodes() -> Vec<String> {
        vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
    }

    #[tokio::test]
    async fn test_resize_skipped_without_allocation() {
        let coordinator = Arc::new(PoolAllocationCoordinator::new());
        let resizer = PoolResizer::new(coordinator);
        let pool = MockPool::new(10, 3);

        resizer.apply_resize(&group("none"), &pool).await.unwrap();
        assert!(pool.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_shrink_orders_min_before_max_then_evicts() {
        let coordinator = Arc::new(PoolAllocationCoordinator::new());
        let g = group("g1");
        coordinator.allocate(&g, 30, 9, &three_nodes()).await;
        let resizer = PoolResizer::new(coordinator.clone());

        // Pool currently holds a survivor-sized share; all nodes healthy again
        let pool = MockPool::new(15, 5);
        resizer.apply_resize(&g, &pool).await.unwrap();

        assert_eq!(
            pool.calls().await,
            vec!["set_min(3)", "set_max(10)", "evict_above(3)"]
        );
    }

    #[tokio::test]
    async fn test_grow_orders_max_before_min() {
        let coordinator = Arc::new(PoolAllocationCoordinator::new());
        let g = group("g1");
        coordinator.allocate(&g, 30, 9, &three_nodes()).await;
        coordinator.update_healthy_nodes(&g, 2).await;
        let resizer = PoolResizer::new(coordinator.clone());

        let pool = MockPool::new(10, 3);
        resizer.apply_resize(&g, &pool).await.unwrap();

        assert_eq!(pool.calls().await, vec!["set_max(15)", "set_min(5)"]);
    }

    #[tokio::test]
    async fn test_resize_is_idempotent() {
        let coordinator = Arc::new(PoolAllocationCoordinator::new());
        let g = group("g1");
        coordinator.allocate(&g, 30, 9, &three_nodes()).await;
        coordinator.update_healthy_nodes(&g, 2).await;
        let resizer = PoolResizer::new(coordinator.clone());

        let pool = MockPool::new(10, 3);
        resizer.apply_resize(&g, &pool).await.unwrap();
        let after_first = pool.calls().await;

        // Same healthy count again: no second pool mutation
        coordinator.update_healthy_nodes(&g, 2).await;
        resizer.apply_resize(&g, &pool).await.unwrap();
        assert_eq!(pool.calls().await, after_first);
    }

    #[tokio::test]
    async fn test_concurrent_appliers_converge() {
        let coordinator = Arc::new(PoolAllocationCoordinator::new());
        let g = group("g1");
        coordinator.allocate(&g, 30, 9, &three_nodes()).await;
        coordinator.update_healthy_nodes(&g, 2).await;
        let resizer = Arc::new(PoolResizer::new(coordinator.clone()));

        let pool = Arc::new(MockPool::new(10, 3));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let resizer = resizer.clone();
            let pool = pool.clone();
            let g = g.clone();
            handles.push(tokio::spawn(async move {
                resizer.apply_resize(&g, pool.as_ref()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // One applier mutates, the rest observe the converged state
        assert_eq!(pool.max_size().await, 15);
        assert_eq!(pool.min_idle().await, 5);
        assert_eq!(pool.calls().await, vec!["set_max(15)", "set_min(5)"]);
    }
}
