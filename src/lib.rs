#![warn(missing_docs)]

//! # orathin
//!
//! A pure Rust driver core for Oracle Database, speaking the TTC wire
//! protocol directly over TCP (optionally TLS). No Oracle client libraries
//! are involved.
//!
//! The crate is the protocol engine of a driver: the framed packet
//! transport, the connect/authenticate state machine, the request and
//! response message codecs, and the cursor/fetch pipeline that turns byte
//! streams into typed rows. It ships two presentations of the same
//! implementation: the cooperative surface on Tokio, and a blocking
//! surface in [`blocking`] that pins each connection to its own thread.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use orathin::{ConnectParams, Connection, Description};
//!
//! #[tokio::main]
//! async fn main() -> orathin::Result<()> {
//!     let description: Description = "localhost:1521/FREEPDB1".parse()?;
//!     let params = ConnectParams::with_credentials("scott", "tiger");
//!     let conn = Connection::connect(description, params).await?;
//!
//!     let mut cursor = conn.cursor();
//!     cursor.execute("SELECT id, name FROM employees WHERE dept = :1", &[10.into()]).await?;
//!     while let Some(row) = cursor.fetchone().await? {
//!         let id = row.get(0).and_then(|v| v.as_i64()).unwrap_or(0);
//!         let name = row.get(1).and_then(|v| v.as_str()).unwrap_or("");
//!         println!("{id}: {name}");
//!     }
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pooling
//!
//! ```rust,no_run
//! use orathin::{ConnectParams, Description, Pool, PoolParams};
//!
//! # async fn example() -> orathin::Result<()> {
//! let description: Description = "localhost:1521/FREEPDB1".parse()?;
//! let pool = Pool::create(
//!     description,
//!     ConnectParams::with_credentials("app", "secret"),
//!     PoolParams { min: 1, max: 8, ..Default::default() },
//!     None,
//! )
//! .await?;
//!
//! let conn = pool.acquire().await?;
//! conn.ping().await?;
//! conn.release().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Supported server versions
//!
//! Oracle Database 12.1 and later. JSON columns need 21c, VECTOR and
//! native BOOLEAN need 23ai.

pub mod blocking;
pub mod buffer;
pub mod caps;
pub mod config;
pub mod connection;
pub mod constants;
pub mod cookie;
pub mod crypto;
pub mod cursor;
pub mod dbobject;
pub mod engine;
pub mod error;
pub mod lob;
pub mod messages;
pub mod packet;
pub mod pool;
pub mod row;
pub mod statement;
pub mod stmt_cache;
pub mod transport;
pub mod types;
pub mod variable;

pub use caps::Capabilities;
pub use config::{
    Address, AddressList, AuthMode, ConnectParams, Description, GetMode, PoolParams, Protocol,
    Purity, ServiceTarget,
};
pub use connection::{Connection, ServerInfo};
pub use constants::OraType;
pub use cursor::{Cursor, ExecuteManyOptions};
pub use dbobject::{DbObject, DbObjectAttr, DbObjectType, TypeKey};
pub use error::{Error, Result, ServerError};
pub use lob::Lob;
pub use pool::{Pool, PooledConnection};
pub use row::{NumberShape, Row, Value};
pub use statement::{ColumnInfo, Statement, StatementKind};
pub use stmt_cache::StatementCache;
pub use transport::TlsParams;
pub use types::{LobChunk, LobLocator, OracleDateTime, OracleNumber, RowId, Vector};
pub use variable::{EncodingErrors, OutputTypeHandler, VarConfig, Variable};

// OSON decodes into and encodes from serde_json values.
pub use serde_json;
