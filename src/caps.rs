//! Negotiated connection capabilities.
//!
//! Capabilities are established in two steps: the ACCEPT packet fixes the
//! protocol version, SDU and the feature flag word; the Protocol message
//! then refines the compile-time and runtime capability vectors against the
//! server's. After phase two completes the struct is frozen for the life of
//! the connection.

use crate::constants::{
    accept_flags, ccap, ccap_value, charset, rcap, rcap_value, service_options, version,
};

/// Driver identification sent during negotiation.
pub const DRIVER_NAME: &str = concat!("orathin : ", env!("CARGO_PKG_VERSION"));

/// Capabilities negotiated between client and server.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Negotiated TNS protocol version
    pub protocol_version: u16,
    /// Service options echoed by the server
    pub protocol_options: u16,
    /// Raw hardware byte-order field from the ACCEPT packet. Recorded for
    /// diagnosis; all integer fields are treated as big-endian.
    pub hardware_byte_order: u16,
    /// Database character set id
    pub charset_id: u16,
    /// National character set id
    pub ncharset_id: u16,
    /// Negotiated session data unit
    pub sdu: u32,
    /// Negotiated transport data unit
    pub tdu: u32,
    /// Compile-time capability vector
    pub compile_caps: Vec<u8>,
    /// Runtime capability vector
    pub runtime_caps: Vec<u8>,
    /// TTC field version in effect (min of client and server)
    pub ttc_field_version: u8,
    /// Maximum VARCHAR2 size (4000 or 32767)
    pub max_string_size: u32,
    /// Server can receive the urgent attention byte
    pub supports_oob: bool,
    /// Single-round-trip authentication is available
    pub supports_fast_auth: bool,
    /// Explicit end-of-request boundaries are in effect
    pub supports_end_of_request: bool,
    /// Pipelined requests are available
    pub supports_pipelining: bool,
    /// Session-state request boundaries are available
    pub supports_request_boundaries: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl Capabilities {
    /// Client-side capabilities before any negotiation.
    pub fn new() -> Self {
        let mut caps = Self {
            protocol_version: 0,
            protocol_options: 0,
            hardware_byte_order: 0,
            charset_id: charset::UTF8,
            ncharset_id: charset::UTF16,
            sdu: crate::constants::connect::DEFAULT_SDU,
            tdu: crate::constants::connect::DEFAULT_TDU,
            compile_caps: vec![0; ccap::MAX],
            runtime_caps: vec![0; rcap::MAX],
            ttc_field_version: ccap_value::FIELD_VERSION_MAX,
            max_string_size: 4000,
            supports_oob: false,
            supports_fast_auth: false,
            supports_end_of_request: false,
            supports_pipelining: false,
            supports_request_boundaries: false,
        };
        caps.seed_compile_caps();
        caps.seed_runtime_caps();
        caps
    }

    fn seed_compile_caps(&mut self) {
        use ccap_value::*;
        let c = &mut self.compile_caps;

        c[ccap::SQL_VERSION] = SQL_VERSION_MAX;
        c[ccap::LOGON_TYPES] =
            O5LOGON | O5LOGON_NP | O7LOGON | O8LOGON_LONG_IDENTIFIER | O9LOGON_LONG_PASSWORD;
        c[ccap::FEATURE_BACKPORT] = CTB_IMPLICIT_POOL | CTB_OAUTH_MSG_ON_ERR;
        c[ccap::FIELD_VERSION] = self.ttc_field_version;
        c[ccap::SERVER_DEFINE_CONV] = 1;
        c[ccap::DEQUEUE_WITH_SELECTOR] = 1;
        c[ccap::TTC1] = FAST_BVEC | END_OF_CALL_STATUS | IND_RCD;
        c[ccap::OCI1] = FAST_SESSION_PROPAGATE | APP_CTX_PIGGYBACK;
        c[ccap::TDS_VERSION] = TDS_VERSION_MAX;
        c[ccap::RPC_VERSION] = RPC_VERSION_MAX;
        c[ccap::RPC_SIG] = RPC_SIG_VALUE;
        c[ccap::DBF_VERSION] = DBF_VERSION_MAX;
        c[ccap::LOB] = LOB_UB8_SIZE
            | LOB_ENCS
            | LOB_PREFETCH_LENGTH
            | LOB_TEMP_SIZE
            | LOB_12C
            | LOB_PREFETCH_DATA;
        c[ccap::UB2_DTY] = 1;
        c[ccap::TTC2] = ZLNP;
        c[ccap::OCI2] = DRCP;
        c[ccap::CLIENT_FN] = CLIENT_FN_MAX;
        c[ccap::OCI3] = OCI3_OCSSYNC;
        c[ccap::TTC3] = IMPLICIT_RESULTS | BIG_CHUNK_CLR | KEEP_OUT_ORDER | LTXID;
        c[ccap::SESS_SIGNATURE_VERSION] = FIELD_VERSION_12_2;
        c[ccap::TTC4] = INBAND_NOTIFICATION | EXPLICIT_BOUNDARY;
        c[ccap::LOB2] = LOB2_QUASI | LOB2_2GB_PREFETCH;
        c[ccap::TTC5] = VECTOR_SUPPORT
            | TOKEN_SUPPORTED
            | PIPELINING_SUPPORT
            | PIPELINING_BREAK
            | SESSIONLESS_TXNS;
        c[ccap::VECTOR_FEATURES] = VECTOR_FEATURE_BINARY | VECTOR_FEATURE_SPARSE;
    }

    fn seed_runtime_caps(&mut self) {
        self.runtime_caps[rcap::COMPAT] = rcap_value::COMPAT_81;
        self.runtime_caps[rcap::TTC] = rcap_value::TTC_ZERO_COPY | rcap_value::TTC_32K;
    }

    /// Apply the phase-one ACCEPT packet fields.
    pub fn apply_accept(
        &mut self,
        protocol_version: u16,
        protocol_options: u16,
        sdu: u32,
        flags2: u32,
    ) {
        self.protocol_version = protocol_version;
        self.protocol_options = protocol_options;
        self.sdu = sdu;

        self.supports_oob =
            (protocol_options & service_options::CAN_RECV_ATTENTION) != 0;
        self.supports_fast_auth = (flags2 & accept_flags::FAST_AUTH) != 0;

        if protocol_version >= version::MIN_END_OF_REQUEST
            && (flags2 & accept_flags::HAS_END_OF_RESPONSE) != 0
        {
            self.compile_caps[ccap::TTC4] |= ccap_value::END_OF_REQUEST;
            self.supports_end_of_request = true;
            self.supports_pipelining = true;
        }
    }

    /// Fold in the server's compile-time capabilities from the Protocol
    /// response.
    pub fn apply_server_compile_caps(&mut self, server: &[u8]) {
        if let Some(&server_field_version) = server.get(ccap::FIELD_VERSION) {
            if server_field_version < self.ttc_field_version {
                self.ttc_field_version = server_field_version;
                self.compile_caps[ccap::FIELD_VERSION] = server_field_version;
            }
        }

        if let Some(&ttc4) = server.get(ccap::TTC4) {
            if (ttc4 & ccap_value::EXPLICIT_BOUNDARY) != 0 {
                self.supports_request_boundaries = true;
            }
        }

        // End-of-request framing only works on 23.4+ field versions.
        if self.ttc_field_version < ccap_value::FIELD_VERSION_23_4 && self.supports_end_of_request {
            self.compile_caps[ccap::TTC4] &= !ccap_value::END_OF_REQUEST;
            self.supports_end_of_request = false;
        }
    }

    /// Fold in the server's runtime capabilities from the Protocol response.
    pub fn apply_server_runtime_caps(&mut self, server: &[u8]) {
        if let Some(&ttc) = server.get(rcap::TTC) {
            self.max_string_size = if (ttc & rcap_value::TTC_32K) != 0 {
                32767
            } else {
                4000
            };
            if (ttc & rcap_value::TTC_SESSION_STATE_OPS) == 0 {
                self.supports_request_boundaries = false;
            }
        }
    }

    /// Whether packet headers carry the 4-byte length field.
    pub fn uses_large_sdu(&self) -> bool {
        self.protocol_version >= version::MIN_LARGE_SDU
    }

    /// Whether the token field precedes function call bodies.
    pub fn needs_token_field(&self) -> bool {
        self.ttc_field_version >= ccap_value::FIELD_VERSION_23_1_EXT_1
    }

    /// Native BOOLEAN support (Oracle 23+).
    pub fn supports_bool(&self) -> bool {
        self.ttc_field_version >= ccap_value::FIELD_VERSION_23_1
    }

    /// Validate that the national charset is one the driver can emit.
    pub fn check_ncharset(&self) -> crate::error::Result<()> {
        if self.ncharset_id != charset::UTF16 && self.ncharset_id != charset::AL16UTF8 {
            return Err(crate::error::Error::NotSupported(format!(
                "national character set {} (only UTF16 and AL16UTF8)",
                self.ncharset_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let caps = Capabilities::new();
        assert_eq!(caps.charset_id, charset::UTF8);
        assert_eq!(caps.ncharset_id, charset::UTF16);
        assert_eq!(caps.compile_caps.len(), ccap::MAX);
        assert_eq!(caps.runtime_caps.len(), rcap::MAX);
        assert!(!caps.supports_oob);
        assert!(!caps.supports_end_of_request);
        assert_ne!(caps.compile_caps[ccap::LOGON_TYPES], 0);
    }

    #[test]
    fn accept_with_all_features() {
        let mut caps = Capabilities::new();
        caps.apply_accept(
            319,
            service_options::CAN_RECV_ATTENTION,
            32768,
            accept_flags::FAST_AUTH | accept_flags::HAS_END_OF_RESPONSE,
        );
        assert!(caps.supports_oob);
        assert!(caps.supports_fast_auth);
        assert!(caps.supports_end_of_request);
        assert!(caps.supports_pipelining);
        assert!(caps.uses_large_sdu());
        assert_eq!(caps.sdu, 32768);
    }

    #[test]
    fn accept_bare() {
        let mut caps = Capabilities::new();
        caps.apply_accept(315, 0, 8192, 0);
        assert!(!caps.supports_oob);
        assert!(!caps.supports_fast_auth);
        assert!(!caps.supports_end_of_request);
        assert!(caps.uses_large_sdu());
    }

    #[test]
    fn server_field_version_lowers_client() {
        let mut caps = Capabilities::new();
        let mut server = vec![0u8; ccap::MAX];
        server[ccap::FIELD_VERSION] = ccap_value::FIELD_VERSION_12_2;
        caps.apply_server_compile_caps(&server);
        assert_eq!(caps.ttc_field_version, ccap_value::FIELD_VERSION_12_2);
        assert!(!caps.needs_token_field());
        assert!(!caps.supports_bool());
    }

    #[test]
    fn old_server_disables_end_of_request() {
        let mut caps = Capabilities::new();
        caps.apply_accept(
            319,
            0,
            8192,
            accept_flags::HAS_END_OF_RESPONSE,
        );
        assert!(caps.supports_end_of_request);

        let mut server = vec![0u8; ccap::MAX];
        server[ccap::FIELD_VERSION] = ccap_value::FIELD_VERSION_21_1;
        caps.apply_server_compile_caps(&server);
        assert!(!caps.supports_end_of_request);
    }

    #[test]
    fn runtime_caps_32k() {
        let mut caps = Capabilities::new();
        let mut server = vec![0u8; rcap::MAX];
        server[rcap::TTC] = rcap_value::TTC_32K;
        caps.apply_server_runtime_caps(&server);
        assert_eq!(caps.max_string_size, 32767);

        caps.apply_server_runtime_caps(&vec![0u8; rcap::MAX]);
        assert_eq!(caps.max_string_size, 4000);
    }

    #[test]
    fn ncharset_validation() {
        let mut caps = Capabilities::new();
        assert!(caps.check_ncharset().is_ok());
        caps.ncharset_id = 871;
        assert!(caps.check_ncharset().is_err());
    }
}
