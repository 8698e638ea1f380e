//! Connect descriptors and connection parameters.
//!
//! A [`Description`] is the normalized form of a connect string: an ordered
//! list of address groups with per-group load-balance/failover policy, plus
//! the service identity and connect-time limits. EZConnect strings
//! (`host:port/service`) and plain `host:port:sid` forms parse into a
//! single-address description.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::auth_mode;
use crate::error::{Error, Result};
use crate::transport::TlsParams;

/// Default listener port.
pub const DEFAULT_PORT: u16 = 1521;

/// Default statement cache size per connection.
pub const DEFAULT_STMT_CACHE_SIZE: usize = 20;

/// Transport protocol of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Plain TCP
    #[default]
    Tcp,
    /// TLS-wrapped TCP
    Tcps,
}

/// A single listener address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Host name or IP
    pub host: String,
    /// Listener port
    pub port: u16,
    /// tcp or tcps
    pub protocol: Protocol,
    /// Optional HTTPS CONNECT proxy `(host, port)`
    pub proxy: Option<(String, u16)>,
}

impl Address {
    /// A plain TCP address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: Protocol::Tcp,
            proxy: None,
        }
    }

    /// The `(ADDRESS=...)` fragment of the connect descriptor.
    fn descriptor_fragment(&self) -> String {
        let proto = match self.protocol {
            Protocol::Tcp => "TCP",
            Protocol::Tcps => "TCPS",
        };
        format!(
            "(ADDRESS=(PROTOCOL={})(HOST={})(PORT={}))",
            proto, self.host, self.port
        )
    }
}

/// A group of addresses sharing one load-balance/failover policy.
#[derive(Debug, Clone, Default)]
pub struct AddressList {
    /// Addresses in configured order
    pub addresses: Vec<Address>,
    /// Pick addresses in random order
    pub load_balance: bool,
    /// Try the next address when one fails (on by default)
    pub failover: bool,
}

/// How the target database is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceTarget {
    /// SERVICE_NAME connect data
    ServiceName(String),
    /// Legacy SID connect data
    Sid(String),
}

impl ServiceTarget {
    /// The value regardless of form.
    pub fn value(&self) -> &str {
        match self {
            ServiceTarget::ServiceName(s) | ServiceTarget::Sid(s) => s,
        }
    }
}

/// Normalized connect descriptor.
#[derive(Debug, Clone)]
pub struct Description {
    /// Ordered address groups
    pub address_lists: Vec<AddressList>,
    /// Service identity
    pub service: ServiceTarget,
    /// Extra REFUSE responses tolerated during phase one
    pub retry_count: u32,
    /// Delay between phase-one retries
    pub retry_delay: Duration,
    /// TCP connect deadline per address
    pub tcp_connect_timeout: Duration,
    /// Requested session data unit
    pub sdu: u32,
    /// TLS parameters for tcps addresses
    pub tls: Option<TlsParams>,
}

impl Description {
    /// A single-address description for the given endpoint.
    pub fn new(address: Address, service: ServiceTarget) -> Self {
        Self {
            address_lists: vec![AddressList {
                addresses: vec![address],
                load_balance: false,
                failover: true,
            }],
            service,
            retry_count: 0,
            retry_delay: Duration::from_secs(1),
            tcp_connect_timeout: Duration::from_secs(10),
            sdu: crate::constants::connect::DEFAULT_SDU,
            tls: None,
        }
    }

    /// All addresses in connect order, flattened across groups.
    pub fn flattened_addresses(&self) -> Vec<&Address> {
        self.address_lists
            .iter()
            .flat_map(|g| g.addresses.iter())
            .collect()
    }

    /// The first address. Descriptions are never empty.
    pub fn primary_address(&self) -> &Address {
        &self.address_lists[0].addresses[0]
    }

    /// Cache key identifying this endpoint for the connection cookie.
    pub fn endpoint_key(&self) -> String {
        let addr = self.primary_address();
        format!("{}:{}/{}", addr.host, addr.port, self.service.value())
    }

    /// Render the TNS connect descriptor string sent in the CONNECT packet.
    pub fn render_connect_string(&self, extra_connect_data: &str) -> String {
        let mut out = String::from("(DESCRIPTION=");
        for group in &self.address_lists {
            if group.addresses.len() > 1 {
                out.push_str("(ADDRESS_LIST=");
                if group.load_balance {
                    out.push_str("(LOAD_BALANCE=ON)");
                }
                if !group.failover {
                    out.push_str("(FAILOVER=OFF)");
                }
                for addr in &group.addresses {
                    out.push_str(&addr.descriptor_fragment());
                }
                out.push(')');
            } else if let Some(addr) = group.addresses.first() {
                out.push_str(&addr.descriptor_fragment());
            }
        }
        out.push_str("(CONNECT_DATA=");
        match &self.service {
            ServiceTarget::ServiceName(name) => {
                out.push_str(&format!("(SERVICE_NAME={name})"));
            }
            ServiceTarget::Sid(sid) => {
                out.push_str(&format!("(SID={sid})"));
            }
        }
        out.push_str(extra_connect_data);
        out.push_str("))");
        out
    }

    /// Replace the address portion with one parsed from a listener REDIRECT
    /// payload while preserving service identity and limits.
    pub fn redirected_to(&self, host: &str, port: u16) -> Self {
        let mut desc = self.clone();
        let protocol = self.primary_address().protocol;
        desc.address_lists = vec![AddressList {
            addresses: vec![Address {
                host: host.to_string(),
                port,
                protocol,
                proxy: None,
            }],
            load_balance: false,
            failover: true,
        }];
        desc
    }
}

impl FromStr for Description {
    type Err = Error;

    /// Parse an EZConnect-style string: `[//]host[:port][/service]` or the
    /// legacy `host:port:sid` form.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().trim_start_matches('/');
        if s.is_empty() {
            return Err(Error::Interface("empty connect string".into()));
        }
        if s.starts_with('(') {
            return Err(Error::Interface(
                "full TNS descriptors must be resolved by the configuration layer; \
                 pass an EZConnect string"
                    .into(),
            ));
        }

        let (protocol, rest) = if let Some(rest) = s.strip_prefix("tcps://") {
            (Protocol::Tcps, rest)
        } else if let Some(rest) = s.strip_prefix("tcp://") {
            (Protocol::Tcp, rest)
        } else {
            (Protocol::Tcp, s)
        };

        let (host_port, service) = match rest.split_once('/') {
            Some((hp, svc)) if !svc.is_empty() => {
                (hp, Some(ServiceTarget::ServiceName(svc.to_string())))
            }
            Some((_, _)) => {
                return Err(Error::Interface("missing service name after '/'".into()))
            }
            None => (rest, None),
        };

        let parts: Vec<&str> = host_port.split(':').collect();
        let (host, port, sid) = match parts.as_slice() {
            [host] => (host.to_string(), DEFAULT_PORT, None),
            [host, port] => (host.to_string(), parse_port(port)?, None),
            [host, port, sid] => (host.to_string(), parse_port(port)?, Some(sid.to_string())),
            _ => {
                return Err(Error::Interface(
                    "too many ':' separators in connect string".into(),
                ))
            }
        };
        if host.is_empty() {
            return Err(Error::Interface("missing host in connect string".into()));
        }

        let service = match (service, sid) {
            (Some(svc), None) => svc,
            (None, Some(sid)) => ServiceTarget::Sid(sid),
            (None, None) => {
                return Err(Error::Interface(
                    "connect string needs a service name or SID".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::Interface(
                    "connect string has both a service name and a SID".into(),
                ))
            }
        };

        let mut address = Address::new(host, port);
        address.protocol = protocol;
        Ok(Description::new(address, service))
    }
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse()
        .map_err(|_| Error::Interface(format!("invalid port {s:?}")))
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.primary_address();
        match &self.service {
            ServiceTarget::ServiceName(name) => {
                write!(f, "{}:{}/{}", addr.host, addr.port, name)
            }
            ServiceTarget::Sid(sid) => write!(f, "{}:{}:{}", addr.host, addr.port, sid),
        }
    }
}

// =============================================================================
// Connection parameters
// =============================================================================

/// DRCP session purity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Purity {
    /// Server decides
    #[default]
    Default,
    /// Force a brand-new session
    New,
    /// Reuse a session of the same class
    Self_,
}

/// Administrative authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum AuthMode {
    #[default]
    Default,
    Prelim,
    SysDba,
    SysOper,
    SysAsm,
    SysBkp,
    SysDgd,
    SysKmt,
    SysRac,
}

impl AuthMode {
    /// The wire bits for this mode (without the LOGON bit).
    pub fn wire_bits(self) -> u32 {
        match self {
            AuthMode::Default => 0,
            AuthMode::Prelim => auth_mode::PRELIM,
            AuthMode::SysDba => auth_mode::SYSDBA,
            AuthMode::SysOper => auth_mode::SYSOPER,
            AuthMode::SysAsm => auth_mode::SYSASM,
            AuthMode::SysBkp => auth_mode::SYSBKP,
            AuthMode::SysDgd => auth_mode::SYSDGD,
            AuthMode::SysKmt => auth_mode::SYSKMT,
            AuthMode::SysRac => auth_mode::SYSRAC,
        }
    }
}

/// Parameters for a single connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    /// Database user
    pub username: String,
    /// Password for password authentication
    pub password: String,
    /// Bearer token for token authentication
    pub token: Option<String>,
    /// DRCP purity
    pub purity: Purity,
    /// Administrative mode
    pub mode: AuthMode,
    /// Subscribe to FAN/notification events
    pub events: bool,
    /// Edition name
    pub edition: Option<String>,
    /// Session tag for pooled session affinity
    pub tag: Option<String>,
    /// DRCP connection class
    pub connection_class: Option<String>,
    /// Suppress the phase-one OOB probe
    pub disable_oob: bool,
    /// Per-call deadline; None disables call timeouts
    pub call_timeout: Option<Duration>,
    /// Statement cache capacity; zero disables caching
    pub stmt_cache_size: usize,
}

impl ConnectParams {
    /// Parameters for password authentication.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            stmt_cache_size: DEFAULT_STMT_CACHE_SIZE,
            ..Default::default()
        }
    }

    /// Set the administrative mode.
    pub fn mode(mut self, mode: AuthMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the statement cache size.
    pub fn stmt_cache_size(mut self, size: usize) -> Self {
        self.stmt_cache_size = size;
        self
    }

    /// Set the per-call timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Disable the phase-one OOB probe.
    pub fn disable_oob(mut self) -> Self {
        self.disable_oob = true;
        self
    }
}

/// How `Pool::acquire` behaves at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GetMode {
    /// Wait for a release
    #[default]
    Wait,
    /// Fail immediately
    NoWait,
    /// Open an extra connection beyond `max`, closed on release
    ForceGet,
    /// Wait up to `wait_timeout`
    TimedWait,
}

/// Parameters for a connection pool.
#[derive(Debug, Clone)]
pub struct PoolParams {
    /// Connections opened up front
    pub min: usize,
    /// Upper bound on pooled connections
    pub max: usize,
    /// Connections added per growth step
    pub increment: usize,
    /// Behavior at capacity
    pub getmode: GetMode,
    /// Wait bound for [`GetMode::TimedWait`]
    pub wait_timeout: Duration,
    /// Idle age after which a connection is pinged before reuse; None pings
    /// never
    pub ping_interval: Option<Duration>,
    /// Idle age after which a connection above `min` is pruned
    pub max_idle_time: Option<Duration>,
    /// All connections share one identity
    pub homogeneous: bool,
    /// Statement cache capacity per pooled connection
    pub stmt_cache_size: usize,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            min: 0,
            max: 4,
            increment: 1,
            getmode: GetMode::Wait,
            wait_timeout: Duration::from_secs(30),
            ping_interval: Some(Duration::from_secs(60)),
            max_idle_time: None,
            homogeneous: true,
            stmt_cache_size: DEFAULT_STMT_CACHE_SIZE,
        }
    }
}

/// Sanitize a value bound for the connect-string CID section. Parentheses
/// and equals signs would corrupt the descriptor nesting.
pub fn sanitize_cid_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '(' | ')' | '=') { '?' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_ezconnect() {
        let desc: Description = "dbhost:1522/SALESPDB".parse().unwrap();
        let addr = desc.primary_address();
        assert_eq!(addr.host, "dbhost");
        assert_eq!(addr.port, 1522);
        assert_eq!(
            desc.service,
            ServiceTarget::ServiceName("SALESPDB".into())
        );
    }

    #[test]
    fn parse_default_port_and_leading_slashes() {
        let desc: Description = "//dbhost/SALESPDB".parse().unwrap();
        assert_eq!(desc.primary_address().port, DEFAULT_PORT);
    }

    #[test]
    fn parse_sid_form() {
        let desc: Description = "dbhost:1521:ORCL".parse().unwrap();
        assert_eq!(desc.service, ServiceTarget::Sid("ORCL".into()));
    }

    #[test]
    fn parse_tcps_scheme() {
        let desc: Description = "tcps://dbhost:2484/SALESPDB".parse().unwrap();
        assert_eq!(desc.primary_address().protocol, Protocol::Tcps);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("".parse::<Description>().is_err());
        assert!("dbhost:notaport/svc".parse::<Description>().is_err());
        assert!("dbhost/".parse::<Description>().is_err());
        assert!("dbhost:1521".parse::<Description>().is_err());
        assert!("(DESCRIPTION=...)".parse::<Description>().is_err());
    }

    #[test]
    fn render_descriptor_single_address() {
        let desc: Description = "dbhost:1522/SALESPDB".parse().unwrap();
        let rendered = desc.render_connect_string("");
        assert!(rendered.contains("(PROTOCOL=TCP)"));
        assert!(rendered.contains("(HOST=dbhost)"));
        assert!(rendered.contains("(PORT=1522)"));
        assert!(rendered.contains("(SERVICE_NAME=SALESPDB)"));
    }

    #[test]
    fn render_descriptor_address_list() {
        let mut desc: Description = "h1:1521/SVC".parse().unwrap();
        desc.address_lists[0].addresses.push(Address::new("h2", 1522));
        desc.address_lists[0].load_balance = true;
        let rendered = desc.render_connect_string("");
        assert!(rendered.contains("(ADDRESS_LIST="));
        assert!(rendered.contains("(LOAD_BALANCE=ON)"));
        assert!(rendered.contains("(HOST=h1)"));
        assert!(rendered.contains("(HOST=h2)"));
    }

    #[test]
    fn redirect_preserves_service() {
        let desc: Description = "h1:1521/SVC".parse().unwrap();
        let redirected = desc.redirected_to("h2", 1599);
        assert_eq!(redirected.primary_address().host, "h2");
        assert_eq!(redirected.primary_address().port, 1599);
        assert_eq!(redirected.service.value(), "SVC");
    }

    #[test]
    fn cid_sanitization() {
        assert_eq!(sanitize_cid_value("my(prog)=x"), "my?prog??x");
        assert_eq!(sanitize_cid_value("plain"), "plain");
    }

    #[test]
    fn endpoint_key_is_stable() {
        let desc: Description = "h1:1521/SVC".parse().unwrap();
        assert_eq!(desc.endpoint_key(), "h1:1521/SVC");
    }

    #[test]
    fn display_round_trips_shape() {
        let desc: Description = "dbhost:1522/SALESPDB".parse().unwrap();
        assert_eq!(desc.to_string(), "dbhost:1522/SALESPDB");
        let desc: Description = "dbhost:1521:ORCL".parse().unwrap();
        assert_eq!(desc.to_string(), "dbhost:1521:ORCL");
    }
}
