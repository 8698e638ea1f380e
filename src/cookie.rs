//! Per-endpoint connection cookie cache.
//!
//! After the first successful phase-two exchange against an endpoint, the
//! server banner and negotiated capabilities are remembered in-process.
//! Later connections to the same endpoint consult the cookie to collapse
//! the Protocol and DataTypes round trips into the fast-auth path. Nothing
//! is persisted to disk.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Cached phase-two negotiation results for one endpoint.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCookie {
    /// Negotiated protocol version
    pub protocol_version: u16,
    /// Server version banner
    pub server_banner: String,
    /// Database charset id
    pub charset_id: u16,
    /// National charset id
    pub ncharset_id: u16,
    /// Server flags from the banner exchange
    pub flags: u32,
    /// Server compile-time capability vector
    pub compile_caps: Vec<u8>,
    /// Server runtime capability vector
    pub runtime_caps: Vec<u8>,
    /// True once every field above has been filled in
    pub populated: bool,
}

fn registry() -> &'static Mutex<HashMap<String, ConnectionCookie>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, ConnectionCookie>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Look up the cookie for an endpoint. Returns only populated cookies.
pub fn lookup(endpoint: &str) -> Option<ConnectionCookie> {
    let map = registry().lock().expect("cookie registry poisoned");
    map.get(endpoint).filter(|c| c.populated).cloned()
}

/// Store the cookie for an endpoint. Written once per endpoint; later
/// identical writes are harmless.
pub fn store(endpoint: &str, cookie: ConnectionCookie) {
    let mut map = registry().lock().expect("cookie registry poisoned");
    map.insert(endpoint.to_string(), cookie);
}

/// Drop the cookie for an endpoint, forcing full negotiation next time.
/// Used when a fast-auth attempt against a stale cookie is rejected.
pub fn invalidate(endpoint: &str) {
    let mut map = registry().lock().expect("cookie registry poisoned");
    map.remove(endpoint);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_unpopulated() {
        let key = "test-unpopulated:1521/X";
        store(key, ConnectionCookie::default());
        assert!(lookup(key).is_none());
    }

    #[test]
    fn store_lookup_invalidate() {
        let key = "test-cycle:1521/X";
        let cookie = ConnectionCookie {
            protocol_version: 319,
            server_banner: "Oracle Database 23ai".into(),
            populated: true,
            ..Default::default()
        };
        store(key, cookie);

        let found = lookup(key).expect("cookie should be present");
        assert_eq!(found.protocol_version, 319);

        invalidate(key);
        assert!(lookup(key).is_none());
    }
}
