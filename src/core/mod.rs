/// Core data types shared across the coordination subsystem
use std::fmt;

/// Reported status of a proxy node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Up,
    Down,
}

impl NodeStatus {
    /// Case-insensitive parse; anything unrecognized is rejected
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("up") {
            Some(NodeStatus::Up)
        } else if s.eq_ignore_ascii_case("down") {
            Some(NodeStatus::Down)
        } else {
            None
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, NodeStatus::Up)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Up => write!(f, "UP"),
            NodeStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Per-node health state as seen by the client router.
///
/// The healthy flag and the failure timestamp are always written together
/// as one unit; callers must never update them independently, or a healthy
/// flag could be observed next to a stale failure time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEndpoint {
    pub address: String,
    pub healthy: bool,
    pub last_failure_ms: i64,
}

impl HealthEndpoint {
    pub fn new(address: String) -> Self {
        Self {
            address,
            healthy: true,
            last_failure_ms: 0,
        }
    }

    /// Mark unhealthy, stamping the failure time in the same update
    pub fn mark_down(&mut self, failure_ms: i64) {
        self.healthy = false;
        self.last_failure_ms = failure_ms;
    }

    pub fn mark_up(&mut self) {
        self.healthy = true;
    }
}

/// Stable identifier for a connection group (target database + credentials
/// + logical datasource name). All coordinator state is scoped by this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionGroupKey(String);

impl ConnectionGroupKey {
    /// Derive a group key from its identifying triple
    pub fn derive(url: &str, user: &str, datasource: &str) -> Self {
        ConnectionGroupKey(crate::utils::derive_group_key(url, user, datasource))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionGroupKey {
    fn from(s: &str) -> Self {
        ConnectionGroupKey(s.to_string())
    }
}

impl fmt::Display for ConnectionGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered cluster-health report, piggybacked on session-establishment
/// calls as `addr(UP);addr(DOWN);...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHealthSnapshot {
    entries: Vec<(String, NodeStatus)>,
}

impl ClusterHealthSnapshot {
    pub fn new(entries: Vec<(String, NodeStatus)>) -> Self {
        Self { entries }
    }

    /// Parse the wire form. Malformed entries are skipped, not fatal;
    /// status comparison is case-insensitive.
    pub fn parse(raw: &str) -> Self {
        let mut entries = Vec::new();
        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match parse_entry(part) {
                Some(entry) => entries.push(entry),
                None => {
                    tracing::debug!("skipping malformed health entry: {:?}", part);
                }
            }
        }
        Self { entries }
    }

    /// Encode to the wire form, no trailing separator
    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|(addr, status)| format!("{}({})", addr, status))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Number of nodes reported UP; unparsable entries were already dropped
    pub fn healthy_count(&self) -> usize {
        self.entries.iter().filter(|(_, s)| s.is_up()).count()
    }

    pub fn entries(&self) -> &[(String, NodeStatus)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_entry(part: &str) -> Option<(String, NodeStatus)> {
    let open = part.find('(')?;
    let close = part.rfind(')')?;
    if close <= open + 1 || open == 0 {
        return None;
    }
    let addr = &part[..open];
    let status = NodeStatus::parse(&part[open + 1..close])?;
    Some((addr.to_string(), status))
}
