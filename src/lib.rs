pub mod cluster;
pub mod config;
/// Pasarela - multinode pool coordination and XA session registry for a
/// database-connection proxy.
///
/// Client processes open logical sessions against a cluster of proxy
/// nodes; each node holds pooled physical connections to a backend
/// database, including connections enlisted in distributed (XA)
/// transactions. This crate implements the coordination core:
///
/// 1. Cluster health propagation, piggybacked on session establishment
/// 2. Dynamic per-node pool resizing as node health changes
/// 3. Health-aware client routing with connect-time failover
/// 4. The XA transaction-branch state machine, reusing one backend
///    connection across sequential transactions of a logical session
pub mod core;
pub mod error;
pub mod pool;
pub mod routing;
pub mod session;
pub mod utils;
pub mod xa;

use crate::cluster::ClusterHealthTracker;
use crate::config::Config;
use crate::core::{ClusterHealthSnapshot, ConnectionGroupKey};
use crate::error::PasarelaResult;
use crate::pool::allocation::{PoolAllocationCoordinator, XaAllocationCoordinator};
use crate::pool::resize::PoolResizer;
use crate::pool::PooledConnections;
use std::sync::Arc;

/// Server-side composition of the per-group coordination machinery.
///
/// Owns the health tracker, both allocation coordinators and the resizer;
/// state for a connection group is created on first use and torn down via
/// [`GroupCoordinator::remove_group`] when the group's last logical session
/// closes. Passed around by explicit reference, never a process-wide
/// singleton.
pub struct GroupCoordinator {
    config: Config,
    tracker: ClusterHealthTracker,
    pool_allocations: Arc<PoolAllocationCoordinator>,
    xa_allocations: Arc<XaAllocationCoordinator>,
    resizer: PoolResizer,
}

impl GroupCoordinator {
    pub fn new(config: Config) -> Self {
        let pool_allocations = Arc::new(PoolAllocationCoordinator::new());
        Self {
            config,
            tracker: ClusterHealthTracker::new(),
            pool_allocations: pool_allocations.clone(),
            xa_allocations: Arc::new(XaAllocationCoordinator::new()),
            resizer: PoolResizer::new(pool_allocations),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool_allocations(&self) -> &PoolAllocationCoordinator {
        &self.pool_allocations
    }

    pub fn xa_allocations(&self) -> &XaAllocationCoordinator {
        &self.xa_allocations
    }

    /// Handle the health snapshot piggybacked on a session-establishment
    /// call: detect change, recompute both per-node shares from the
    /// current healthy count and apply the pool resize.
    ///
    /// Change detection and resize are not atomic as a pair; two
    /// concurrent reports may both observe a change and both apply. That
    /// is safe because share recomputation is idempotent and resize
    /// application is serialized per group.
    pub async fn observe_health_report(
        &self,
        group: &ConnectionGroupKey,
        raw_snapshot: &str,
        pool: &dyn PooledConnections,
    ) -> PasarelaResult<bool> {
        if !self.tracker.has_changed(group, raw_snapshot).await {
            return Ok(false);
        }

        let snapshot = ClusterHealthSnapshot::parse(raw_snapshot);
        let healthy = snapshot.healthy_count() as u32;

        if self.pool_allocations.get(group).await.is_none() {
            // First report for this group: establish the allocations
            self.pool_allocations
                .allocate(
                    group,
                    self.config.pool.max_size,
                    self.config.pool.min_idle,
                    &self.config.nodes,
                )
                .await;
            self.xa_allocations
                .allocate(group, self.config.xa.max_concurrent, &self.config.nodes)
                .await;
        }

        self.pool_allocations
            .update_healthy_nodes(group, healthy)
            .await;
        self.xa_allocations
            .update_healthy_nodes(group, healthy)
            .await;
        self.resizer.apply_resize(group, pool).await?;
        Ok(true)
    }

    /// Tear down all per-group state; called when the last logical session
    /// of the group closes.
    pub async fn remove_group(&self, group: &ConnectionGroupKey) {
        self.tracker.forget(group).await;
        self.pool_allocations.remove(group).await;
        self.xa_allocations.remove(group).await;
        self.resizer.remove_group(group).await;
        tracing::debug!("tore down coordinator state for group {}", group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::PasarelaResult;
    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    struct TestPool {
        state: AsyncMutex<(u32, u32, usize)>, // max, min, mutations
    }

    impl TestPool {
        fn new(max: u32, min: u32) -> Self {
            Self {
                state: AsyncMutex::new((max, min, 0)),
            }
        }

        async fn mutations(&self) -> usize {
            self.state.lock().await.2
        }
    }

    #[async_trait]
    impl PooledConnections for TestPool {
        async fn max_size(&self) -> u32 {
            self.state.lock().await.0
        }

        async fn min_idle(&self) -> u32 {
            self.state.lock().await.1
        }

        async fn set_max_size(&self, size: u32) -> PasarelaResult<()> {
            let mut state = self.state.lock().await;
            state.0 = size;
            state.2 += 1;
            Ok(())
        }

        async fn set_min_idle(&self, size: u32) -> PasarelaResult<()> {
            let mut state = self.state.lock().await;
            state.1 = size;
            state.2 += 1;
            Ok(())
        }

        async fn evict_idle_above(&self, _keep: u32) -> PasarelaResult<()> {
            let mut state = self.state.lock().await;
            state.2 += 1;
            Ok(())
        }
    }

    fn three_node_config() -> Config {
        Config {
            nodes: vec![
                "10.0.0.1:16021".to_string(),
                "10.0.0.2:16021".to_string(),
                "10.0.0.3:16021".to_string(),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_health_report_drives_resize() {
        let coordinator = GroupCoordinator::new(three_node_config());
        let group = ConnectionGroupKey::from("g1");
        let pool = TestPool::new(0, 0);

        // First report: all three up, shares 30/9 -> 10/3
        let all_up = "10.0.0.1:16021(UP);10.0.0.2:16021(UP);10.0.0.3:16021(UP)";
        assert!(coordinator
            .observe_health_report(&group, all_up, &pool)
            .await
            .unwrap());
        assert_eq!(pool.max_size().await, 10);
        assert_eq!(pool.min_idle().await, 3);
        let xa = coordinator.xa_allocations().get(&group).await.unwrap();
        assert_eq!(xa.current_limit, 20);

        // Same report again: no change, no mutation
        let before = pool.mutations().await;
        assert!(!coordinator
            .observe_health_report(&group, all_up, &pool)
            .await
            .unwrap());
        assert_eq!(pool.mutations().await, before);

        // One node down: survivors grow to 15/5
        let one_down = "10.0.0.1:16021(UP);10.0.0.2:16021(UP);10.0.0.3:16021(DOWN)";
        assert!(coordinator
            .observe_health_report(&group, one_down, &pool)
            .await
            .unwrap());
        assert_eq!(pool.max_size().await, 15);
        assert_eq!(pool.min_idle().await, 5);

        // Node restored: back to 10/3
        assert!(coordinator
            .observe_health_report(&group, all_up, &pool)
            .await
            .unwrap());
        assert_eq!(pool.max_size().await, 10);
        assert_eq!(pool.min_idle().await, 3);
    }

    #[tokio::test]
    async fn test_remove_group_resets_everything() {
        let coordinator = GroupCoordinator::new(three_node_config());
        let group = ConnectionGroupKey::from("g1");
        let pool = TestPool::new(0, 0);

        let all_up = "10.0.0.1:16021(UP);10.0.0.2:16021(UP);10.0.0.3:16021(UP)";
        coordinator
            .observe_health_report(&group, all_up, &pool)
            .await
            .unwrap();

        coordinator.remove_group(&group).await;
        assert!(coordinator.pool_allocations().get(&group).await.is_none());
        assert!(coordinator.xa_allocations().get(&group).await.is_none());

        // A repeat of the old snapshot counts as a first report again
        assert!(coordinator
            .observe_health_report(&group, all_up, &pool)
            .await
            .unwrap());
    }
}
