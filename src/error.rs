//! Error taxonomy for the driver.
//!
//! Server errors are classified by their ORA code into the DB-API style
//! kinds: interface misuse, database errors, operational (connection-level)
//! failures, integrity violations, data errors, and unsupported features.
//! Protocol-layer variants cover packet framing and decode failures; the
//! resumable decoder uses [`Error::OutOfPackets`] as its rewind signal.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::constants::ora;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A decoded server error block.
#[derive(Debug, Clone, Default)]
pub struct ServerError {
    /// ORA error number (0 means no error)
    pub code: u32,
    /// Error message text, trailing newline stripped
    pub message: String,
    /// Offset into the SQL text, where applicable
    pub offset: u16,
    /// True when the server flagged this as a warning only
    pub is_warning: bool,
    /// Rowid associated with the error, when the server sent one
    pub rowid: Option<String>,
    /// Row number in the failed array DML iteration
    pub row_offset: u64,
}

impl ServerError {
    /// Build a server error from its code and message.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        ServerError {
            code,
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Errors raised by the driver core.
#[derive(Error, Debug)]
pub enum Error {
    // -------------------------------------------------------------------------
    // Resumable decode control
    // -------------------------------------------------------------------------
    /// The read buffer ran out of packet data mid-decode. The caller rewinds
    /// to its restore point and retries after more packets arrive.
    #[error("decode needs more packet data")]
    OutOfPackets,

    // -------------------------------------------------------------------------
    // Protocol layer
    // -------------------------------------------------------------------------
    /// Unknown packet type byte.
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    /// Unknown TTC message type byte.
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Unknown Oracle data type number.
    #[error("invalid Oracle type number: {0}")]
    InvalidOraType(u8),

    /// Malformed data at the protocol layer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server protocol version below the supported floor.
    #[error("server protocol version {got} not supported (minimum {minimum})")]
    UnsupportedProtocolVersion {
        /// Version the server offered
        got: u16,
        /// Floor the client enforces
        minimum: u16,
    },

    /// The listener refused the connection.
    #[error("listener refused connection{}", refusal_suffix(.0))]
    Refused(Option<ServerError>),

    /// The server requires native network encryption, which this driver does
    /// not speak.
    #[error("server requires native network encryption")]
    NativeEncryptionRequired,

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------
    /// The socket closed or the connection was force-closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// TCP connect or call deadline elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A call exceeded the configured call timeout and was broken off.
    #[error("call timeout of {0:?} exceeded")]
    CallTimeout(Duration),

    /// An in-flight call was cancelled via break.
    #[error("call cancelled")]
    CallCancelled,

    /// The HTTPS CONNECT proxy did not accept the tunnel.
    #[error("proxy failure: {0}")]
    ProxyFailure(String),

    /// TLS handshake or renegotiation failed.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// Authentication failed for a reason other than a server error block.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Underlying socket error.
    #[error(transparent)]
    Io(#[from] io::Error),

    // -------------------------------------------------------------------------
    // DB-API taxonomy
    // -------------------------------------------------------------------------
    /// API misuse or client-side protocol violation. Not retriable.
    #[error("interface error: {0}")]
    Interface(String),

    /// Server returned an ORA error.
    #[error("ORA-{:05}: {}", .0.code, .0.message)]
    Database(ServerError),

    /// Transient or fatal connection-level server error.
    #[error("ORA-{:05}: {}", .0.code, .0.message)]
    Operational(ServerError),

    /// Constraint violation.
    #[error("ORA-{:05}: {}", .0.code, .0.message)]
    Integrity(ServerError),

    /// Problem with the data itself (overflow, truncation, conversion).
    #[error("ORA-{:05}: {}", .0.code, .0.message)]
    Data(ServerError),

    /// The requested feature is not available in this driver.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A value could not be converted between wire and Rust representations.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Invariant violation inside the driver.
    #[error("internal error: {0}")]
    Internal(String),
}

fn refusal_suffix(err: &Option<ServerError>) -> String {
    match err {
        Some(e) if e.code != 0 => format!(": ORA-{:05}: {}", e.code, e.message),
        Some(e) if !e.message.is_empty() => format!(": {}", e.message),
        _ => String::new(),
    }
}

impl Error {
    /// Classify a server error block into the DB-API taxonomy.
    pub fn from_server(err: ServerError) -> Self {
        match err.code {
            ora::UNIQUE_CONSTRAINT
            | ora::NULL_INTO_NOT_NULL
            | ora::CHECK_CONSTRAINT
            | ora::PARENT_KEY_NOT_FOUND
            | ora::CHILD_RECORD_FOUND => Error::Integrity(err),

            ora::NUMERIC_OVERFLOW | ora::VALUE_TOO_LARGE | ora::INCONSISTENT_DATA_TYPES => {
                Error::Data(err)
            }

            code if is_session_dead_code(code) => Error::Operational(err),

            ora::CALL_TIMEOUT => Error::Operational(err),

            _ => Error::Database(err),
        }
    }

    /// Shorthand for building a classified error from code and message.
    pub fn oracle(code: u32, message: impl Into<String>) -> Self {
        Error::from_server(ServerError::new(code, message))
    }

    /// The server error block carried by this error, if any.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Error::Database(e)
            | Error::Operational(e)
            | Error::Integrity(e)
            | Error::Data(e) => Some(e),
            Error::Refused(Some(e)) => Some(e),
            _ => None,
        }
    }

    /// True when the session behind the connection is known dead and the
    /// socket must be force-closed.
    pub fn is_session_dead(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(_) => true,
            _ => self
                .server_error()
                .map(|e| is_session_dead_code(e.code))
                .unwrap_or(false),
        }
    }

    /// True when the statement must be reparsed before the call can be
    /// retried (the cached cursor is no longer valid).
    pub fn requires_reparse(&self) -> bool {
        self.server_error()
            .map(|e| {
                matches!(
                    e.code,
                    ora::INCONSISTENT_DATA_TYPES | ora::VAR_NOT_IN_SELECT_LIST
                )
            })
            .unwrap_or(false)
    }
}

fn is_session_dead_code(code: u32) -> bool {
    matches!(
        code,
        ora::SESSION_KILLED
            | ora::SESSION_TERMINATED
            | ora::EXCEEDED_IDLE_TIME
            | ora::EOF_ON_CHANNEL
            | ora::NOT_CONNECTED
            | ora::PACKET_WRITE_FAILURE
            | ora::SESSION_SHUTDOWN
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_integrity() {
        let err = Error::oracle(1, "unique constraint (X.PK) violated");
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn classify_operational_session_dead() {
        let err = Error::oracle(3113, "end-of-file on communication channel");
        assert!(matches!(err, Error::Operational(_)));
        assert!(err.is_session_dead());
    }

    #[test]
    fn classify_plain_database() {
        let err = Error::oracle(1017, "invalid username/password; logon denied");
        assert!(matches!(err, Error::Database(_)));
        assert!(!err.is_session_dead());
    }

    #[test]
    fn display_includes_code() {
        let err = Error::oracle(1017, "invalid username/password");
        assert_eq!(err.to_string(), "ORA-01017: invalid username/password");
    }

    #[test]
    fn reparse_detection() {
        assert!(Error::oracle(932, "inconsistent datatypes").requires_reparse());
        assert!(!Error::oracle(1017, "nope").requires_reparse());
    }
}
