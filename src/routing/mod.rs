/// Client-side routing: health probing, load-aware endpoint selection and
/// connect-time failover across the proxy cluster.
pub mod probe;

use crate::config::{HealthConfig, RoutingConfig};
use crate::core::{ClusterHealthSnapshot, HealthEndpoint, NodeStatus};
use crate::error::{PasarelaError, PasarelaResult};
use crate::routing::probe::StatusProbe;
use crate::session::{IdleInvalidator, SessionId};
use crate::utils;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Transport seam for session establishment. Every call carries the
/// encoded cluster-health snapshot as a piggybacked field; health is never
/// pushed through a dedicated message, so peers only learn of a failure on
/// the next connect.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, address: &str, health_snapshot: &str) -> PasarelaResult<SessionId>;
}

/// A session routed to a specific endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedSession {
    pub session_id: SessionId,
    pub endpoint: String,
}

/// Routing view of one endpoint
struct EndpointState {
    health: HealthEndpoint,
    consecutive_failures: u32,
    active_sessions: usize,
}

/// Releases the single-flight probe flag even if a probe cycle panics
struct ProbeGuard<'a>(&'a AtomicBool);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Maintains endpoint health and routes new logical sessions.
///
/// Selection is load-aware: among healthy endpoints, the one with the
/// fewest active sessions wins, ties broken by configured list order. A
/// recovered endpoint attracts new sessions naturally because its active
/// count is low; there is no forced rebalance.
pub struct ClientRoutingManager {
    addresses: Vec<String>,
    endpoints: RwLock<HashMap<String, EndpointState>>,
    probe: Arc<dyn StatusProbe>,
    invalidator: Option<Arc<dyn IdleInvalidator>>,
    health_config: HealthConfig,
    routing_config: RoutingConfig,
    probe_in_flight: AtomicBool,
    last_probe_ms: AtomicI64,
    rotation: AtomicUsize,
}

impl ClientRoutingManager {
    pub fn new(
        addresses: Vec<String>,
        probe: Arc<dyn StatusProbe>,
        health_config: HealthConfig,
        routing_config: RoutingConfig,
    ) -> Self {
        let endpoints = addresses
            .iter()
            .map(|address| {
                (
                    address.clone(),
                    EndpointState {
                        health: HealthEndpoint::new(address.clone()),
                        consecutive_failures: 0,
                        active_sessions: 0,
                    },
                )
            })
            .collect();

        Self {
            addresses,
            endpoints: RwLock::new(endpoints),
            probe,
            invalidator: None,
            health_config,
            routing_config,
            probe_in_flight: AtomicBool::new(false),
            last_probe_ms: AtomicI64::new(0),
            rotation: AtomicUsize::new(0),
        }
    }

    /// Attach the hook that drops idle sessions bound to an endpoint when
    /// it turns unhealthy
    pub fn with_invalidator(mut self, invalidator: Arc<dyn IdleInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Encode the current health view in configured list order
    pub async fn snapshot(&self) -> ClusterHealthSnapshot {
        let endpoints = self.endpoints.read().await;
        let entries = self
            .addresses
            .iter()
            .map(|address| {
                let healthy = endpoints
                    .get(address)
                    .map(|state| state.health.healthy)
                    .unwrap_or(false);
                (
                    address.clone(),
                    if healthy { NodeStatus::Up } else { NodeStatus::Down },
                )
            })
            .collect();
        ClusterHealthSnapshot::new(entries)
    }

    /// Run one probe cycle unless another caller is already probing or the
    /// interval has not elapsed. The last-probe timestamp moves *before*
    /// the work so concurrent callers skip instead of duplicating it.
    pub async fn maybe_probe(&self) -> bool {
        let now = utils::now_millis();
        let last = self.last_probe_ms.load(Ordering::Acquire);
        if now - last < self.health_config.interval_ms as i64 {
            return false;
        }

        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _guard = ProbeGuard(&self.probe_in_flight);
        self.last_probe_ms.store(now, Ordering::Release);

        self.run_probe_cycle().await;
        true
    }

    async fn run_probe_cycle(&self) {
        for address in &self.addresses {
            match self.probe.probe(address).await {
                Ok(()) => self.record_probe_success(address).await,
                Err(e) => {
                    tracing::debug!("probe failed for {}: {}", address, e);
                    self.record_failure(address).await;
                }
            }
        }
    }

    async fn record_probe_success(&self, address: &str) {
        let recovered = {
            let mut endpoints = self.endpoints.write().await;
            match endpoints.get_mut(address) {
                Some(state) => {
                    state.consecutive_failures = 0;
                    if !state.health.healthy {
                        state.health.mark_up();
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if recovered {
            tracing::info!("endpoint {} recovered", address);
        }
    }

    /// Count a probe or connect failure; past the threshold the endpoint
    /// is marked unhealthy (flag and failure time written as one unit) and
    /// its idle sessions are invalidated.
    async fn record_failure(&self, address: &str) {
        let went_down = {
            let mut endpoints = self.endpoints.write().await;
            match endpoints.get_mut(address) {
                Some(state) => {
                    state.consecutive_failures += 1;
                    if state.health.healthy
                        && state.consecutive_failures >= self.health_config.failure_threshold
                    {
                        state.health.mark_down(utils::now_millis());
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if went_down {
            tracing::warn!("endpoint {} marked unhealthy", address);
            if let Some(invalidator) = &self.invalidator {
                invalidator.invalidate_idle(address).await;
            }
        }
    }

    /// Pick an endpoint for a new session, skipping `exclude` (endpoints
    /// already tried in this connect call); None when nothing qualifies
    async fn select_endpoint(&self, exclude: &HashSet<String>) -> Option<String> {
        let endpoints = self.endpoints.read().await;

        if self.routing_config.load_aware {
            let mut best: Option<(&String, usize)> = None;
            for address in &self.addresses {
                let state = endpoints.get(address)?;
                if !state.health.healthy || exclude.contains(address) {
                    continue;
                }
                // Strict < keeps list order as the tie-breaker
                match best {
                    Some((_, active)) if state.active_sessions >= active => {}
                    _ => best = Some((address, state.active_sessions)),
                }
            }
            best.map(|(address, _)| address.clone())
        } else {
            let start = self.rotation.fetch_add(1, Ordering::Relaxed);
            for offset in 0..self.addresses.len() {
                let address = &self.addresses[(start + offset) % self.addresses.len()];
                if let Some(state) = endpoints.get(address) {
                    if state.health.healthy && !exclude.contains(address) {
                        return Some(address.clone());
                    }
                }
            }
            None
        }
    }

    /// Establish a logical session with bounded connect-time failover.
    /// Each attempt carries the current encoded snapshot.
    pub async fn connect(&self, connector: &dyn SessionConnector) -> PasarelaResult<RoutedSession> {
        let max_attempts = self.routing_config.max_attempts;
        let mut last_error: Option<PasarelaError> = None;
        let mut tried = HashSet::new();

        for attempt in 1..=max_attempts {
            let address = match self.select_endpoint(&tried).await {
                Some(address) => address,
                None => {
                    // Either everything is unhealthy or every healthy
                    // endpoint has already failed this call
                    return Err(last_error
                        .unwrap_or(PasarelaError::NoHealthyNode { attempts: attempt }));
                }
            };
            tried.insert(address.clone());

            let snapshot = self.snapshot().await.encode();
            match connector.connect(&address, &snapshot).await {
                Ok(session_id) => {
                    let mut endpoints = self.endpoints.write().await;
                    if let Some(state) = endpoints.get_mut(&address) {
                        state.active_sessions += 1;
                    }
                    tracing::debug!(
                        "session {} established on {} (attempt {})",
                        session_id,
                        address,
                        attempt
                    );
                    return Ok(RoutedSession {
                        session_id,
                        endpoint: address,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "connect attempt {}/{} to {} failed: {}",
                        attempt,
                        max_attempts,
                        address,
                        e
                    );
                    self.record_failure(&address).await;
                    last_error = Some(e);
                    if attempt < max_attempts && self.routing_config.retry_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(
                            self.routing_config.retry_delay_ms,
                        ))
                        .await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PasarelaError::NoHealthyNode {
            attempts: max_attempts,
        }))
    }

    /// Drop a routed session from its endpoint's active count
    pub async fn release(&self, session: &RoutedSession) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(state) = endpoints.get_mut(&session.endpoint) {
            state.active_sessions = state.active_sessions.saturating_sub(1);
        }
    }

    pub async fn active_sessions(&self, address: &str) -> usize {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(address)
            .map(|state| state.active_sessions)
            .unwrap_or(0)
    }

    pub async fn is_healthy(&self, address: &str) -> bool {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(address)
            .map(|state| state.health.healthy)
            .unwrap_or(false)
    }

    /// Force an endpoint unhealthy regardless of the failure counter
    pub async fn mark_unhealthy(&self, address: &str) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(state) = endpoints.get_mut(address) {
            state.consecutive_failures = self.health_config.failure_threshold;
            state.health.mark_down(utils::now_millis());
        }
    }

    /// Start the periodic probe loop on a background task
    pub async fn start_probe_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.health_config.interval_ms));
        loop {
            interval.tick().await;
            self.maybe_probe().await;
        }
    }
}
