/// Utility functions and helpers
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a unique ID based on timestamp and random component
pub fn generate_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let random: u32 = rand::random();
    format!("{}-{}-{:x}", prefix, timestamp, random)
}

/// Milliseconds since the unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Derive a stable connection-group key from the target database URL,
/// credential user and logical datasource name.
///
/// The same triple always hashes to the same key, so every node of the
/// cluster scopes its coordinator state identically.
pub fn derive_group_key(url: &str, user: &str, datasource: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\x00");
    hasher.update(user.as_bytes());
    hasher.update(b"\x00");
    hasher.update(datasource.as_bytes());

    let result = hasher.finalize();
    // First 8 bytes keep the key short enough for log lines
    format!("cg-{}", hex::encode(&result[..8]))
}

/// Parse socket address with error handling
pub fn parse_socket_addr(addr: &str) -> Result<std::net::SocketAddr, std::net::AddrParseError> {
    addr.parse()
}
