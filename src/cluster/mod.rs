/// Cluster health change detection, scoped per connection group
use crate::core::ConnectionGroupKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Detects whether a cluster's reported health changed since the last
/// observation for a connection group.
///
/// The snapshot is compared as an opaque string; parsing only happens after
/// a change has been detected. The first report for a fresh group always
/// counts as a change so that a restarted process with no prior baseline
/// still triggers a correct allocation.
pub struct ClusterHealthTracker {
    baselines: Arc<RwLock<HashMap<ConnectionGroupKey, String>>>,
}

impl ClusterHealthTracker {
    pub fn new() -> Self {
        Self {
            baselines: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns true if `snapshot` differs from the stored baseline (or no
    /// baseline exists); on true, `snapshot` becomes the new baseline.
    pub async fn has_changed(&self, group: &ConnectionGroupKey, snapshot: &str) -> bool {
        {
            let baselines = self.baselines.read().await;
            if baselines.get(group).map(String::as_str) == Some(snapshot) {
                return false;
            }
        }

        let mut baselines = self.baselines.write().await;
        match baselines.get(group) {
            // Another report slipped in between the locks with the same value
            Some(known) if known == snapshot => false,
            _ => {
                tracing::debug!("cluster health changed for group {}: {}", group, snapshot);
                baselines.insert(group.clone(), snapshot.to_string());
                true
            }
        }
    }

    /// Drop the baseline for a group (called on logical-group teardown)
    pub async fn forget(&self, group: &ConnectionGroupKey) {
        let mut baselines = self.baselines.write().await;
        baselines.remove(group);
    }

    /// Number of groups with a stored baseline
    pub async fn group_count(&self) -> usize {
        let baselines = self.baselines.read().await;
        baselines.len()
    }
}

impl Default for ClusterHealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
