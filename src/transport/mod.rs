//! Transport layer: TCP dialing, optional TLS, proxy tunneling, and
//! packet-level send/receive.

mod tcp;
pub mod tls;

pub use tcp::Transport;
pub use tls::TlsParams;
