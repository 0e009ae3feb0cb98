/// Logical session registry
///
/// A logical session is the client-facing handle for one application-level
/// connection. At creation it is bound to one backend session (a pooled
/// physical connection capable of XA operations) and keeps that binding for
/// its entire lifetime; the backend is not returned between transactions,
/// only when the logical session closes.
use crate::core::ConnectionGroupKey;
use crate::error::{PasarelaError, PasarelaResult};
use crate::utils;
use crate::xa::XaResource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Identifier of a logical session; the XA layer references backend
/// sessions through this key rather than holding them directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One logical session and its exclusive backend binding
pub struct LogicalSession {
    pub id: SessionId,
    pub group: ConnectionGroupKey,
    pub endpoint: String,
    pub created_at_ms: i64,
    pub idle: bool,
    backend: Arc<dyn XaResource>,
}

impl LogicalSession {
    pub fn backend(&self) -> Arc<dyn XaResource> {
        self.backend.clone()
    }
}

/// Invalidation hook used by the routing layer when an endpoint turns
/// unhealthy: idle sessions bound to it are dropped so they cannot be
/// handed a dead connection later.
#[async_trait]
pub trait IdleInvalidator: Send + Sync {
    async fn invalidate_idle(&self, endpoint: &str) -> usize;
}

/// Outcome of closing a logical session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub group: ConnectionGroupKey,
    /// True when this was the last session of its connection group; the
    /// caller then tears down the group's coordinator state.
    pub last_of_group: bool,
}

/// Registry of open logical sessions, keyed by session id
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, LogicalSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a logical session bound to `backend` for its whole lifetime
    pub async fn open(
        &self,
        group: &ConnectionGroupKey,
        endpoint: &str,
        backend: Arc<dyn XaResource>,
    ) -> SessionId {
        let id = SessionId(utils::generate_id("sess"));
        let session = LogicalSession {
            id: id.clone(),
            group: group.clone(),
            endpoint: endpoint.to_string(),
            created_at_ms: utils::now_millis(),
            idle: false,
            backend,
        };

        let mut sessions = self.sessions.write().await;
        sessions.insert(id.clone(), session);
        tracing::debug!("opened logical session {} on {}", id, endpoint);
        id
    }

    /// Non-owning lookup of the backend bound to a session
    pub async fn backend(&self, id: &SessionId) -> PasarelaResult<Arc<dyn XaResource>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|session| session.backend())
            .ok_or_else(|| PasarelaError::SessionNotFound {
                session_id: id.to_string(),
            })
    }

    pub async fn group_of(&self, id: &SessionId) -> Option<ConnectionGroupKey> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|session| session.group.clone())
    }

    /// Mark a session idle (between client requests) or active
    pub async fn set_idle(&self, id: &SessionId, idle: bool) -> PasarelaResult<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) => {
                session.idle = idle;
                Ok(())
            }
            None => Err(PasarelaError::SessionNotFound {
                session_id: id.to_string(),
            }),
        }
    }

    /// Close a session; its backend binding drops here, conceptually
    /// returning the physical connection to the pool.
    pub async fn close(&self, id: &SessionId) -> PasarelaResult<CloseOutcome> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .remove(id)
            .ok_or_else(|| PasarelaError::SessionNotFound {
                session_id: id.to_string(),
            })?;

        let remaining = sessions
            .values()
            .filter(|s| s.group == session.group)
            .count();
        tracing::debug!(
            "closed logical session {} ({} remaining in group {})",
            id,
            remaining,
            session.group
        );
        Ok(CloseOutcome {
            group: session.group,
            last_of_group: remaining == 0,
        })
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    pub async fn count_for_group(&self, group: &ConnectionGroupKey) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| &s.group == group).count()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdleInvalidator for SessionRegistry {
    async fn invalidate_idle(&self, endpoint: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let doomed: Vec<SessionId> = sessions
            .values()
            .filter(|s| s.idle && s.endpoint == endpoint)
            .map(|s| s.id.clone())
            .collect();

        for id in &doomed {
            sessions.remove(id);
        }
        if !doomed.is_empty() {
            tracing::warn!(
                "invalidated {} idle session(s) bound to unhealthy endpoint {}",
                doomed.len(),
                endpoint
            );
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xa::tests::RecordingResource;

    fn group(name: &str) -> ConnectionGroupKey {
        ConnectionGroupKey::from(name)
    }

    #[tokio::test]
    async fn test_open_and_lookup_backend() {
        let registry = SessionRegistry::new();
        let backend = Arc::new(RecordingResource::new());
        let id = registry.open(&group("g1"), "a:1", backend.clone()).await;

        assert!(registry.backend(&id).await.is_ok());
        assert_eq!(registry.session_count().await, 1);

        let missing = SessionId::from("sess-missing");
        assert!(matches!(
            registry.backend(&missing).await,
            Err(PasarelaError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_reports_last_of_group() {
        let registry = SessionRegistry::new();
        let g = group("g1");
        let first = registry
            .open(&g, "a:1", Arc::new(RecordingResource::new()))
            .await;
        let second = registry
            .open(&g, "b:2", Arc::new(RecordingResource::new()))
            .await;

        let outcome = registry.close(&first).await.unwrap();
        assert!(!outcome.last_of_group);

        let outcome = registry.close(&second).await.unwrap();
        assert!(outcome.last_of_group);
        assert_eq!(outcome.group, g);

        assert!(registry.close(&second).await.is_err());
    }

    #[tokio::test]
    async fn test_invalidate_idle_only_touches_idle_on_endpoint() {
        let registry = SessionRegistry::new();
        let g = group("g1");
        let idle_on_a = registry
            .open(&g, "a:1", Arc::new(RecordingResource::new()))
            .await;
        let busy_on_a = registry
            .open(&g, "a:1", Arc::new(RecordingResource::new()))
            .await;
        let idle_on_b = registry
            .open(&g, "b:2", Arc::new(RecordingResource::new()))
            .await;

        registry.set_idle(&idle_on_a, true).await.unwrap();
        registry.set_idle(&idle_on_b, true).await.unwrap();

        assert_eq!(registry.invalidate_idle("a:1").await, 1);
        assert!(registry.backend(&idle_on_a).await.is_err());
        assert!(registry.backend(&busy_on_a).await.is_ok());
        assert!(registry.backend(&idle_on_b).await.is_ok());
    }
}
