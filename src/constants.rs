//! TNS/TTC wire protocol constants.
//!
//! TNS is the packet layer (framing, markers, connect negotiation); TTC is
//! the message layer carried inside DATA packets. The values here follow the
//! on-wire protocol spoken by Oracle Database 12.1 through 23ai.

// =============================================================================
// Packet layer
// =============================================================================

/// Size of the TNS packet header in bytes (both length encodings).
pub const PACKET_HEADER_SIZE: usize = 8;

/// TNS packet types, byte 5 of the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Client connection request
    Connect = 1,
    /// Server accepts the connection
    Accept = 2,
    /// Server refuses the connection
    Refuse = 4,
    /// Server redirects the client to another address
    Redirect = 5,
    /// TTC message stream
    Data = 6,
    /// Server asks for the previous packet again
    Resend = 11,
    /// Break / reset / interrupt control marker
    Marker = 12,
    /// Inband notification
    Control = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Accept),
            4 => Ok(PacketType::Refuse),
            5 => Ok(PacketType::Redirect),
            6 => Ok(PacketType::Data),
            11 => Ok(PacketType::Resend),
            12 => Ok(PacketType::Marker),
            14 => Ok(PacketType::Control),
            _ => Err(crate::error::Error::InvalidPacketType(value)),
        }
    }
}

/// Packet header flag bits (byte 6).
#[allow(missing_docs)]
pub mod packet_flags {
    pub const REDIRECT: u8 = 0x04;
    pub const TLS_RENEG: u8 = 0x08;
}

/// Marker packet payloads are three bytes: `{1, 0, marker_type}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkerType {
    /// Cancel the in-flight call
    Break = 1,
    /// Acknowledge readiness after a break
    Reset = 2,
    /// Interrupt request
    Interrupt = 3,
}

/// Data flags, the first two bytes of every DATA packet payload.
#[allow(missing_docs)]
pub mod data_flags {
    pub const EOF: u16 = 0x0040;
    pub const END_OF_REQUEST: u16 = 0x0800;
    pub const BEGIN_PIPELINE: u16 = 0x1000;
    pub const END_OF_RESPONSE: u16 = 0x2000;
}

// =============================================================================
// TTC message layer
// =============================================================================

/// TTC message types, the leading byte of each message inside a DATA packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Protocol negotiation
    Protocol = 1,
    /// Data type negotiation
    DataTypes = 2,
    /// Function call (the request side of most operations)
    Function = 3,
    /// Server error block
    Error = 4,
    /// Row header
    RowHeader = 6,
    /// Row data
    RowData = 7,
    /// OPI parameter block
    Parameter = 8,
    /// Call status
    Status = 9,
    /// I/O vector (bind directions)
    IoVector = 11,
    /// LOB chunk data
    LobData = 14,
    /// Warning block
    Warning = 15,
    /// Column describe information
    DescribeInfo = 16,
    /// Client piggyback function
    Piggyback = 17,
    /// Server withheld OUT binds pending a flush
    FlushOutBinds = 19,
    /// Compressed-row bit vector
    BitVector = 21,
    /// Server-side piggyback
    ServerSidePiggyback = 23,
    /// Oneway function
    OnewayFn = 26,
    /// Implicit result set announcement
    ImplicitResultset = 27,
    /// Renegotiation request
    Renegotiate = 28,
    /// End of request/response boundary
    EndOfRequest = 29,
    /// Token exchange
    Token = 33,
    /// Combined fast authentication
    FastAuth = 34,
}

impl TryFrom<u8> for MessageType {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            1 => Ok(MessageType::Protocol),
            2 => Ok(MessageType::DataTypes),
            3 => Ok(MessageType::Function),
            4 => Ok(MessageType::Error),
            6 => Ok(MessageType::RowHeader),
            7 => Ok(MessageType::RowData),
            8 => Ok(MessageType::Parameter),
            9 => Ok(MessageType::Status),
            11 => Ok(MessageType::IoVector),
            14 => Ok(MessageType::LobData),
            15 => Ok(MessageType::Warning),
            16 => Ok(MessageType::DescribeInfo),
            17 => Ok(MessageType::Piggyback),
            19 => Ok(MessageType::FlushOutBinds),
            21 => Ok(MessageType::BitVector),
            23 => Ok(MessageType::ServerSidePiggyback),
            26 => Ok(MessageType::OnewayFn),
            27 => Ok(MessageType::ImplicitResultset),
            28 => Ok(MessageType::Renegotiate),
            29 => Ok(MessageType::EndOfRequest),
            33 => Ok(MessageType::Token),
            34 => Ok(MessageType::FastAuth),
            _ => Err(crate::error::Error::InvalidMessageType(value)),
        }
    }
}

/// TTC function codes carried by [`MessageType::Function`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum FunctionCode {
    Reexecute = 4,
    Fetch = 5,
    Logoff = 9,
    Commit = 14,
    Rollback = 15,
    ReexecuteAndFetch = 78,
    Execute = 94,
    LobOp = 96,
    CloseCursors = 105,
    AuthPhaseTwo = 115,
    AuthPhaseOne = 118,
    Ping = 147,
    SessionRelease = 163,
    PipelineBegin = 199,
    PipelineEnd = 200,
}

// =============================================================================
// Protocol versions and connect-time values
// =============================================================================

/// TNS protocol version thresholds.
pub mod version {
    /// Version requested in the CONNECT packet
    pub const DESIRED: u16 = 319;
    /// Oldest version the client will speak
    pub const MINIMUM: u16 = 300;
    /// Oldest version the client will accept from a server (Oracle 12.1)
    pub const MIN_ACCEPTED: u16 = 315;
    /// First version with the 4-byte packet length field
    pub const MIN_LARGE_SDU: u16 = 315;
    /// First version performing the OOB probe
    pub const MIN_OOB_CHECK: u16 = 318;
    /// First version with explicit end-of-request boundaries
    pub const MIN_END_OF_REQUEST: u16 = 319;
}

/// Session/transport data unit defaults and CONNECT packet fields.
pub mod connect {
    /// Default session data unit
    pub const DEFAULT_SDU: u32 = 8192;
    /// Default transport data unit
    pub const DEFAULT_TDU: u32 = 65535;
    /// Protocol characteristics word sent in CONNECT
    pub const PROTOCOL_CHARACTERISTICS: u16 = 0x4f98;
    /// Connect flag requesting the OOB probe
    pub const CHECK_OOB_FLAG: u32 = 0x01;
    /// Largest connect descriptor that rides inside the CONNECT packet itself
    pub const MAX_INLINE_CONNECT_DATA: usize = 230;
    /// Offset of the connect data within the CONNECT packet
    pub const CONNECT_DATA_OFFSET: u16 = 74;
}

/// Service option bits (CONNECT / ACCEPT).
#[allow(missing_docs)]
pub mod service_options {
    pub const DONT_CARE: u16 = 0x0001;
    pub const CAN_RECV_ATTENTION: u16 = 0x0400;
}

/// NSI flag bits in the CONNECT packet.
#[allow(missing_docs)]
pub mod nsi_flags {
    pub const DISABLE_NA: u8 = 0x04;
    pub const NA_REQUIRED: u8 = 0x10;
    pub const SUPPORT_SECURITY_RENEG: u8 = 0x80;
}

/// ACCEPT packet `flags2` bits (protocol version >= 318).
#[allow(missing_docs)]
pub mod accept_flags {
    pub const CHECK_OOB: u32 = 0x0000_0001;
    pub const HAS_END_OF_RESPONSE: u32 = 0x0200_0000;
    pub const FAST_AUTH: u32 = 0x1000_0000;
}

// =============================================================================
// Authentication
// =============================================================================

/// Authentication mode bits.
#[allow(missing_docs)]
pub mod auth_mode {
    pub const LOGON: u32 = 0x0000_0001;
    pub const CHANGE_PASSWORD: u32 = 0x0000_0002;
    pub const SYSDBA: u32 = 0x0000_0020;
    pub const SYSOPER: u32 = 0x0000_0040;
    pub const PRELIM: u32 = 0x0000_0080;
    pub const WITH_PASSWORD: u32 = 0x0000_0100;
    pub const SYSASM: u32 = 0x0040_0000;
    pub const SYSBKP: u32 = 0x0100_0000;
    pub const SYSDGD: u32 = 0x0200_0000;
    pub const SYSKMT: u32 = 0x0400_0000;
    pub const SYSRAC: u32 = 0x0800_0000;
    pub const IAM_TOKEN: u32 = 0x2000_0000;
}

/// Password verifier generations.
#[allow(missing_docs)]
pub mod verifier {
    pub const TYPE_11G_1: u32 = 0xb152;
    pub const TYPE_11G_2: u32 = 0x1b25;
    pub const TYPE_12C: u32 = 0x4815;
}

/// DRCP session release flags.
#[allow(missing_docs)]
pub mod release_mode {
    pub const NORMAL: u32 = 0;
    pub const DEAUTHENTICATE: u32 = 0x0000_0002;
}

// =============================================================================
// Character sets
// =============================================================================

/// Character set ids used on the wire.
#[allow(missing_docs)]
pub mod charset {
    pub const AL16UTF8: u16 = 208;
    pub const UTF8: u16 = 873;
    pub const UTF16: u16 = 2000;
}

/// Character set form byte attached to string values.
pub mod csfrm {
    /// Database character set
    pub const IMPLICIT: u8 = 1;
    /// National character set
    pub const NCHAR: u8 = 2;
}

// =============================================================================
// Capability vectors
// =============================================================================

/// Compile-time capability vector indices.
#[allow(missing_docs)]
pub mod ccap {
    pub const SQL_VERSION: usize = 0;
    pub const LOGON_TYPES: usize = 4;
    pub const FEATURE_BACKPORT: usize = 5;
    pub const FIELD_VERSION: usize = 7;
    pub const SERVER_DEFINE_CONV: usize = 8;
    pub const DEQUEUE_WITH_SELECTOR: usize = 9;
    pub const TTC1: usize = 15;
    pub const OCI1: usize = 16;
    pub const TDS_VERSION: usize = 17;
    pub const RPC_VERSION: usize = 18;
    pub const RPC_SIG: usize = 19;
    pub const DBF_VERSION: usize = 21;
    pub const LOB: usize = 23;
    pub const TTC2: usize = 26;
    pub const UB2_DTY: usize = 27;
    pub const OCI2: usize = 31;
    pub const CLIENT_FN: usize = 34;
    pub const OCI3: usize = 35;
    pub const TTC3: usize = 37;
    pub const SESS_SIGNATURE_VERSION: usize = 39;
    pub const TTC4: usize = 40;
    pub const LOB2: usize = 42;
    pub const TTC5: usize = 44;
    pub const VECTOR_FEATURES: usize = 52;
    pub const MAX: usize = 53;
}

/// Compile-time capability values.
#[allow(missing_docs)]
pub mod ccap_value {
    pub const SQL_VERSION_MAX: u8 = 6;

    pub const FIELD_VERSION_12_2: u8 = 8;
    pub const FIELD_VERSION_12_2_EXT_1: u8 = 9;
    pub const FIELD_VERSION_19_1: u8 = 12;
    pub const FIELD_VERSION_21_1: u8 = 16;
    pub const FIELD_VERSION_23_1: u8 = 17;
    pub const FIELD_VERSION_23_1_EXT_1: u8 = 18;
    pub const FIELD_VERSION_23_4: u8 = 24;
    pub const FIELD_VERSION_MAX: u8 = 24;

    pub const O5LOGON: u8 = 8;
    pub const O5LOGON_NP: u8 = 2;
    pub const O7LOGON: u8 = 32;
    pub const O8LOGON_LONG_IDENTIFIER: u8 = 64;
    pub const O9LOGON_LONG_PASSWORD: u8 = 0x80;

    pub const CTB_IMPLICIT_POOL: u8 = 0x08;
    pub const CTB_OAUTH_MSG_ON_ERR: u8 = 0x10;

    pub const END_OF_CALL_STATUS: u8 = 0x01;
    pub const IND_RCD: u8 = 0x08;
    pub const FAST_SESSION_PROPAGATE: u8 = 0x10;
    pub const FAST_BVEC: u8 = 0x20;
    pub const APP_CTX_PIGGYBACK: u8 = 0x80;

    pub const TDS_VERSION_MAX: u8 = 3;
    pub const RPC_VERSION_MAX: u8 = 7;
    pub const RPC_SIG_VALUE: u8 = 3;
    pub const DBF_VERSION_MAX: u8 = 1;
    pub const CLIENT_FN_MAX: u8 = 12;

    pub const LOB_UB8_SIZE: u8 = 0x01;
    pub const LOB_ENCS: u8 = 0x02;
    pub const LOB_PREFETCH_DATA: u8 = 0x04;
    pub const LOB_TEMP_SIZE: u8 = 0x08;
    pub const LOB_PREFETCH_LENGTH: u8 = 0x40;
    pub const LOB_12C: u8 = 0x80;
    pub const LOB2_QUASI: u8 = 0x01;
    pub const LOB2_2GB_PREFETCH: u8 = 0x04;

    pub const ZLNP: u8 = 0x04;
    pub const DRCP: u8 = 0x10;
    pub const INBAND_NOTIFICATION: u8 = 0x04;
    pub const END_OF_REQUEST: u8 = 0x20;
    pub const EXPLICIT_BOUNDARY: u8 = 0x40;

    pub const LTXID: u8 = 0x08;
    pub const IMPLICIT_RESULTS: u8 = 0x10;
    pub const BIG_CHUNK_CLR: u8 = 0x20;
    pub const KEEP_OUT_ORDER: u8 = 0x80;

    pub const TOKEN_SUPPORTED: u8 = 0x02;
    pub const PIPELINING_SUPPORT: u8 = 0x04;
    pub const VECTOR_SUPPORT: u8 = 0x08;
    pub const PIPELINING_BREAK: u8 = 0x10;
    pub const SESSIONLESS_TXNS: u8 = 0x20;

    pub const VECTOR_FEATURE_BINARY: u8 = 0x01;
    pub const VECTOR_FEATURE_SPARSE: u8 = 0x02;

    pub const OCI3_OCSSYNC: u8 = 0x20;
}

/// Runtime capability vector indices.
#[allow(missing_docs)]
pub mod rcap {
    pub const COMPAT: usize = 0;
    pub const TTC: usize = 6;
    pub const MAX: usize = 11;
}

/// Runtime capability values.
#[allow(missing_docs)]
pub mod rcap_value {
    pub const COMPAT_81: u8 = 2;
    pub const TTC_ZERO_COPY: u8 = 0x01;
    pub const TTC_32K: u8 = 0x04;
    pub const TTC_SESSION_STATE_OPS: u8 = 0x10;
}

// =============================================================================
// Wire value length encoding
// =============================================================================

/// Length indicator bytes for variable-length values.
pub mod length {
    /// Largest value length encodable in the single length byte
    pub const MAX_SHORT: u8 = 252;
    /// Escape: the next byte carries a special value
    pub const ESCAPE: u8 = 253;
    /// The value follows in chunked form
    pub const LONG_FORM: u8 = 254;
    /// The value is NULL
    pub const NULL: u8 = 255;
    /// Maximum bytes per chunk in long form
    pub const CHUNK_SIZE: usize = 32767;
}

// =============================================================================
// Execute options / flags
// =============================================================================

/// Execute option bits (the function-code bitmap of the execute call).
#[allow(missing_docs)]
pub mod exec_option {
    pub const PARSE: u32 = 0x01;
    pub const BIND: u32 = 0x08;
    pub const DEFINE: u32 = 0x10;
    pub const EXECUTE: u32 = 0x20;
    pub const FETCH: u32 = 0x40;
    pub const COMMIT: u32 = 0x100;
    pub const PLSQL_BIND: u32 = 0x400;
    pub const NOT_PLSQL: u32 = 0x8000;
    pub const DESCRIBE: u32 = 0x20000;
    pub const NO_COMPRESSED_FETCH: u32 = 0x40000;
    pub const BATCH_ERRORS: u32 = 0x80000;
}

/// Execute flag bits (al8i4[9]).
#[allow(missing_docs)]
pub mod exec_flags {
    pub const SCROLLABLE: u32 = 0x02;
    pub const NO_CANCEL_ON_EOF: u32 = 0x80;
    pub const DML_ROWCOUNTS: u32 = 0x4000;
    pub const IMPLICIT_RESULTSET: u32 = 0x8000;
}

/// Bind direction values as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum BindDirection {
    /// Server writes, client reads
    Output = 16,
    /// Client writes, server reads
    #[default]
    Input = 32,
    /// Both directions
    InputOutput = 48,
}

impl BindDirection {
    /// True for IN and IN OUT binds.
    pub fn is_input(self) -> bool {
        matches!(self, BindDirection::Input | BindDirection::InputOutput)
    }

    /// True for OUT and IN OUT binds.
    pub fn is_output(self) -> bool {
        matches!(self, BindDirection::Output | BindDirection::InputOutput)
    }

    /// Decode the wire value.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            16 => Some(BindDirection::Output),
            32 => Some(BindDirection::Input),
            48 => Some(BindDirection::InputOutput),
            _ => None,
        }
    }
}

/// Bind metadata flag bits.
#[allow(missing_docs)]
pub mod bind_flags {
    pub const USE_INDICATORS: u8 = 0x01;
    pub const ARRAY: u8 = 0x40;
}

// =============================================================================
// Oracle data types
// =============================================================================

/// Oracle internal data type numbers as they appear in describe and bind
/// metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum OraType {
    Varchar = 1,
    Number = 2,
    BinaryInteger = 3,
    Long = 8,
    Rowid = 11,
    Date = 12,
    Raw = 23,
    LongRaw = 24,
    Char = 96,
    BinaryFloat = 100,
    BinaryDouble = 101,
    Cursor = 102,
    Object = 109,
    Clob = 112,
    Blob = 113,
    Bfile = 114,
    Json = 119,
    Vector = 127,
    Timestamp = 180,
    TimestampTz = 181,
    IntervalYm = 182,
    IntervalDs = 183,
    Urowid = 208,
    TimestampLtz = 231,
    Boolean = 252,
}

impl OraType {
    /// LOB-class types that carry locators instead of inline data.
    pub fn is_lob(self) -> bool {
        matches!(
            self,
            OraType::Clob | OraType::Blob | OraType::Bfile | OraType::Json | OraType::Vector
        )
    }

    /// Types whose values cannot ride along with prefetched rows.
    pub fn defeats_prefetch(self) -> bool {
        matches!(
            self,
            OraType::Clob
                | OraType::Blob
                | OraType::Json
                | OraType::Vector
                | OraType::Long
                | OraType::LongRaw
        )
    }

    /// Character-class types, which carry a charset form byte.
    pub fn is_character(self) -> bool {
        matches!(
            self,
            OraType::Varchar | OraType::Char | OraType::Long | OraType::Clob | OraType::Json
        )
    }
}

impl TryFrom<u8> for OraType {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OraType::Varchar),
            2 => Ok(OraType::Number),
            3 => Ok(OraType::BinaryInteger),
            8 => Ok(OraType::Long),
            11 => Ok(OraType::Rowid),
            12 => Ok(OraType::Date),
            23 => Ok(OraType::Raw),
            24 => Ok(OraType::LongRaw),
            96 => Ok(OraType::Char),
            100 => Ok(OraType::BinaryFloat),
            101 => Ok(OraType::BinaryDouble),
            102 => Ok(OraType::Cursor),
            109 => Ok(OraType::Object),
            112 => Ok(OraType::Clob),
            113 => Ok(OraType::Blob),
            114 => Ok(OraType::Bfile),
            119 => Ok(OraType::Json),
            127 => Ok(OraType::Vector),
            180 => Ok(OraType::Timestamp),
            181 => Ok(OraType::TimestampTz),
            182 => Ok(OraType::IntervalYm),
            183 => Ok(OraType::IntervalDs),
            208 => Ok(OraType::Urowid),
            231 => Ok(OraType::TimestampLtz),
            252 => Ok(OraType::Boolean),
            _ => Err(crate::error::Error::InvalidOraType(value)),
        }
    }
}

/// Maximum length of LONG / LONG RAW values.
pub const MAX_LONG_LENGTH: u32 = 0x7FFF_FFFF;

/// Maximum length of a UROWID value.
pub const MAX_UROWID_LENGTH: u32 = 5267;

// =============================================================================
// LOB operations
// =============================================================================

/// LOB suboperation codes for [`FunctionCode::LobOp`].
#[allow(missing_docs)]
pub mod lob_op {
    pub const GET_LENGTH: u32 = 0x0001;
    pub const READ: u32 = 0x0002;
    pub const TRIM: u32 = 0x0020;
    pub const WRITE: u32 = 0x0040;
    pub const GET_CHUNK_SIZE: u32 = 0x4000;
    pub const CREATE_TEMP: u32 = 0x0110;
    pub const FREE_TEMP: u32 = 0x0111;
    pub const OPEN: u32 = 0x8000;
    pub const CLOSE: u32 = 0x10000;
    pub const IS_OPEN: u32 = 0x11000;
    pub const FILE_OPEN: u32 = 0x0100;
    pub const FILE_CLOSE: u32 = 0x0200;
    pub const FILE_ISOPEN: u32 = 0x0400;
    pub const FILE_EXISTS: u32 = 0x0800;
}

/// LOB locator layout facts.
#[allow(missing_docs)]
pub mod lob_locator {
    /// Locator bytes before the server-private section
    pub const FIXED_OFFSET: usize = 16;
    pub const OFFSET_FLAG_1: usize = 4;
    pub const OFFSET_FLAG_2: usize = 5;
    pub const OFFSET_FLAG_4: usize = 7;
    pub const FLAG_1_BLOB: u8 = 0x01;
    pub const FLAG_1_VALUE_BASED: u8 = 0x20;
    pub const FLAG_1_ABSTRACT: u8 = 0x40;
    pub const FLAG_2_INITIALIZED: u8 = 0x08;
    pub const FLAG_4_TEMPORARY: u8 = 0x01;
    pub const FLAG_4_VAR_LENGTH_CHARSET: u8 = 0x80;
    /// Duration code for session-scoped temporary LOBs
    pub const DURATION_SESSION: u64 = 10;
    /// Buffer size factor used when binding a locator
    pub const BIND_BUFFER_SIZE: u32 = 112;
    /// Prefetch flag planted in the bind cont_flag field
    pub const PREFETCH_FLAG: u64 = 0x0200_0000;
}

// =============================================================================
// Server-side piggyback opcodes
// =============================================================================

/// Opcodes in [`MessageType::ServerSidePiggyback`] messages.
#[allow(missing_docs)]
pub mod piggyback_op {
    pub const QUERY_CACHE_INVALIDATION: u8 = 1;
    pub const OS_PID_MTS: u8 = 2;
    pub const TRACE_EVENT: u8 = 3;
    pub const SESS_RET: u8 = 4;
    pub const SYNC: u8 = 5;
    pub const LTXID: u8 = 7;
    pub const AC_REPLAY_CONTEXT: u8 = 8;
    pub const EXT_SYNC: u8 = 9;
    pub const SESS_SIGNATURE: u8 = 10;
}

// =============================================================================
// Oracle error codes the engine needs to recognize
// =============================================================================

/// ORA error codes with dedicated handling.
#[allow(missing_docs)]
pub mod ora {
    pub const UNIQUE_CONSTRAINT: u32 = 1;
    pub const SESSION_KILLED: u32 = 28;
    pub const INCONSISTENT_DATA_TYPES: u32 = 932;
    pub const VAR_NOT_IN_SELECT_LIST: u32 = 1007;
    pub const INVALID_CREDENTIALS: u32 = 1017;
    pub const NULL_INTO_NOT_NULL: u32 = 1400;
    pub const NO_DATA_FOUND: u32 = 1403;
    pub const NUMERIC_OVERFLOW: u32 = 1426;
    pub const VALUE_TOO_LARGE: u32 = 1438;
    pub const CHECK_CONSTRAINT: u32 = 2290;
    pub const PARENT_KEY_NOT_FOUND: u32 = 2291;
    pub const CHILD_RECORD_FOUND: u32 = 2292;
    pub const EXCEEDED_IDLE_TIME: u32 = 2396;
    pub const SESSION_TERMINATED: u32 = 2399;
    pub const EOF_ON_CHANNEL: u32 = 3113;
    pub const NOT_CONNECTED: u32 = 3114;
    pub const INVALID_SID: u32 = 12505;
    pub const INVALID_SERVICE_NAME: u32 = 12514;
    pub const PACKET_WRITE_FAILURE: u32 = 12571;
    pub const SESSION_SHUTDOWN: u32 = 12572;
    pub const CALL_TIMEOUT: u32 = 12751;
    pub const ARRAY_DML_ERRORS: u32 = 24381;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_round_trip() {
        for ty in [
            PacketType::Connect,
            PacketType::Accept,
            PacketType::Refuse,
            PacketType::Redirect,
            PacketType::Data,
            PacketType::Resend,
            PacketType::Marker,
            PacketType::Control,
        ] {
            assert_eq!(PacketType::try_from(ty as u8).unwrap(), ty);
        }
        assert!(PacketType::try_from(0xF0).is_err());
    }

    #[test]
    fn message_type_values() {
        assert_eq!(MessageType::Function as u8, 3);
        assert_eq!(MessageType::FlushOutBinds as u8, 19);
        assert_eq!(MessageType::EndOfRequest as u8, 29);
        assert_eq!(MessageType::try_from(34).unwrap(), MessageType::FastAuth);
        assert!(MessageType::try_from(250).is_err());
    }

    #[test]
    fn ora_type_predicates() {
        assert!(OraType::Clob.is_lob());
        assert!(OraType::Long.defeats_prefetch());
        assert!(!OraType::Number.is_lob());
        assert!(OraType::Varchar.is_character());
        assert!(!OraType::Raw.is_character());
    }

    #[test]
    fn bind_direction_predicates() {
        assert!(BindDirection::Input.is_input());
        assert!(!BindDirection::Input.is_output());
        assert!(BindDirection::InputOutput.is_input());
        assert!(BindDirection::InputOutput.is_output());
        assert_eq!(BindDirection::from_wire(48), Some(BindDirection::InputOutput));
        assert_eq!(BindDirection::from_wire(7), None);
    }
}
