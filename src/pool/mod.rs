/// Live connection pool coordination: per-node allocation math and resize
/// application against the underlying pooled-connection provider.
pub mod allocation;
pub mod resize;

use crate::error::PasarelaResult;
use async_trait::async_trait;

/// Collaborator interface over the underlying pooled-connection provider.
///
/// Allocation internals belong to the provider; this subsystem only adjusts
/// the configured bounds and asks for idle connections above the new
/// minimum to be evicted.
#[async_trait]
pub trait PooledConnections: Send + Sync {
    /// Currently configured maximum pool size
    async fn max_size(&self) -> u32;

    /// Currently configured minimum idle count
    async fn min_idle(&self) -> u32;

    async fn set_max_size(&self, size: u32) -> PasarelaResult<()>;

    async fn set_min_idle(&self, size: u32) -> PasarelaResult<()>;

    /// Evict idle connections above `keep`; may block on I/O
    async fn evict_idle_above(&self, keep: u32) -> PasarelaResult<()>;
}
