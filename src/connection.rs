//! The connection facade.
//!
//! A [`Connection`] owns a protocol engine, a statement cache and a type
//! cache. The engine mutex serializes calls: the wire protocol is strictly
//! request/response, so at most one message is in flight per connection.
//! [`Connection::break_external`] is the one entry point that bypasses the
//! queue — it raises the engine's break signal from any task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, Weak};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::{ConnectParams, Description};
use crate::constants::OraType;
use crate::cookie::{self, ConnectionCookie};
use crate::cursor::Cursor;
use crate::engine::{BreakSignal, ConnState, ProtocolEngine};
use crate::error::{Error, Result};
use crate::lob::Lob;
use crate::messages::{
    AuthExchange, CommitCall, DataTypesExchange, FastAuthExchange, LobCall, PingCall,
    ProtocolExchange, RollbackCall, SessionInfo, SessionReleaseCall, TtcMessage,
};
use crate::stmt_cache::StatementCache;
use crate::dbobject::{self, DbObjectAttr, DbObjectType, TypeCache, TypeKey};
use crate::types::LobLocator;
use crate::variable::OutputTypeHandler;

/// Server-side facts about the session.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server version banner
    pub banner: String,
    /// Session id
    pub session_id: u32,
    /// Session serial number
    pub serial_number: u16,
    /// Negotiated protocol version
    pub protocol_version: u16,
}

pub(crate) struct ConnInner {
    pub(crate) engine: Mutex<ProtocolEngine>,
    pub(crate) break_signal: Arc<BreakSignal>,
    pub(crate) stmt_cache: SyncMutex<StatementCache>,
    pub(crate) type_cache: SyncMutex<TypeCache>,
    pub(crate) params: ConnectParams,
    pub(crate) description: Description,
    pub(crate) server: ServerInfo,
    pub(crate) closed: AtomicBool,
    pub(crate) autocommit: AtomicBool,
    pub(crate) output_type_handler: SyncMutex<Option<OutputTypeHandler>>,
    /// DRCP session tag applied on release
    pub(crate) tag: SyncMutex<Option<String>>,
}

impl ConnInner {
    /// Run one message through the engine, collecting tombstoned cursors
    /// first so their close rides along.
    pub(crate) async fn call(&self, msg: &mut dyn TtcMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let mut engine = self.engine.lock().await;
        {
            let mut cache = self.stmt_cache.lock().expect("stmt cache poisoned");
            if cache.has_tombstones() {
                engine.schedule_cursor_close(cache.drain_tombstones());
            }
        }
        let result = engine.process_message(msg).await;
        if engine.state() == ConnState::Closed {
            self.closed.store(true, Ordering::Release);
        }
        result
    }

    pub(crate) async fn next_sequence(&self) -> u8 {
        self.engine.lock().await.next_sequence()
    }
}

/// An open database connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    /// Connect and authenticate against a description.
    ///
    /// Phase one dials (with REFUSE retry and REDIRECT replay), phase two
    /// negotiates the protocol and data types and runs the O5LOGON
    /// exchange. When the server advertises fast auth and a populated
    /// endpoint cookie exists, phase two collapses into the combined
    /// fast-auth round trip.
    pub async fn connect(description: Description, params: ConnectParams) -> Result<Self> {
        let program = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|f| f.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "orathin".into());

        let (mut engine, _accept) =
            ProtocolEngine::connect(&description, &program, params.disable_oob).await?;
        engine.set_call_timeout(params.call_timeout);

        // Phase two. With a populated endpoint cookie and server fast-auth
        // support, the protocol and data-type exchanges ride inside a
        // single combined round trip; otherwise each runs separately.
        let endpoint = description.endpoint_key();
        let cached = cookie::lookup(&endpoint);
        let use_fast_auth = engine.caps.supports_fast_auth && cached.is_some();

        let (protocol, session): (ProtocolExchange, SessionInfo) = if use_fast_auth {
            let mut fast = FastAuthExchange::new(&params);
            match engine.process_message(&mut fast).await {
                Ok(()) if fast.auth.is_complete() => {}
                _ => {
                    // The cookie was stale; renegotiate from scratch on a
                    // fresh connection attempt.
                    cookie::invalidate(&endpoint);
                    return Err(Error::Auth(
                        "fast authentication rejected; retry the connection".into(),
                    ));
                }
            }
            fast.protocol.apply(&mut engine.caps);
            engine.caps.check_ncharset()?;
            let session = fast.auth.session.clone();
            (fast.protocol, session)
        } else {
            let mut protocol = ProtocolExchange::new();
            engine.process_message(&mut protocol).await?;
            protocol.apply(&mut engine.caps);
            engine.caps.check_ncharset()?;

            let mut data_types = DataTypesExchange::new();
            engine.process_message(&mut data_types).await?;

            let mut auth = AuthExchange::new(&params);
            engine.process_message(&mut auth).await?;
            if !auth.is_complete() {
                return Err(Error::Auth("logon did not complete".into()));
            }
            let session = auth.session.clone();
            (protocol, session)
        };
        engine.set_authenticated();

        if cached.is_none() {
            cookie::store(
                &endpoint,
                ConnectionCookie {
                    protocol_version: engine.caps.protocol_version,
                    server_banner: protocol.server_banner.clone(),
                    charset_id: engine.caps.charset_id,
                    ncharset_id: engine.caps.ncharset_id,
                    flags: 0,
                    compile_caps: protocol.server_compile_caps.clone(),
                    runtime_caps: protocol.server_runtime_caps.clone(),
                    populated: true,
                },
            );
        }

        let server = ServerInfo {
            banner: protocol.server_banner.clone(),
            session_id: session.session_id,
            serial_number: session.serial_number,
            protocol_version: engine.caps.protocol_version,
        };
        tracing::debug!(
            banner = %server.banner,
            session_id = server.session_id,
            "connected"
        );

        let break_signal = engine.break_signal();
        let inner = Arc::new(ConnInner {
            engine: Mutex::new(engine),
            break_signal,
            stmt_cache: SyncMutex::new(StatementCache::new(params.stmt_cache_size)),
            type_cache: SyncMutex::new(TypeCache::new()),
            tag: SyncMutex::new(params.tag.clone()),
            params,
            description,
            server,
            closed: AtomicBool::new(false),
            autocommit: AtomicBool::new(false),
            output_type_handler: SyncMutex::new(None),
        });
        Ok(Self { inner })
    }

    /// Connect with an EZConnect string.
    pub async fn connect_simple(
        connect_string: &str,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        let description: Description = connect_string.parse()?;
        let params = ConnectParams::with_credentials(username, password);
        Self::connect(description, params).await
    }

    pub(crate) fn inner(&self) -> &Arc<ConnInner> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnInner> {
        Arc::downgrade(&self.inner)
    }

    /// Server facts captured at logon.
    pub fn server_info(&self) -> &ServerInfo {
        &self.inner.server
    }

    /// True once the connection is closed or force-closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether DML commits implicitly after each execute.
    pub fn autocommit(&self) -> bool {
        self.inner.autocommit.load(Ordering::Acquire)
    }

    /// Toggle autocommit.
    pub fn set_autocommit(&self, on: bool) {
        self.inner.autocommit.store(on, Ordering::Release);
    }

    /// Install the connection-level output type handler. Cursor-level
    /// handlers take precedence.
    pub fn set_output_type_handler(&self, handler: Option<OutputTypeHandler>) {
        *self
            .inner
            .output_type_handler
            .lock()
            .expect("handler lock poisoned") = handler;
    }

    /// Change the per-call timeout for subsequent calls.
    pub async fn set_call_timeout(&self, timeout: Option<Duration>) {
        self.inner.engine.lock().await.set_call_timeout(timeout);
    }

    /// Open a cursor.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.downgrade())
    }

    /// Commit the open transaction.
    pub async fn commit(&self) -> Result<()> {
        let seq = self.inner.next_sequence().await;
        let mut call = CommitCall::new(seq);
        self.inner.call(&mut call).await
    }

    /// Roll the open transaction back.
    pub async fn rollback(&self) -> Result<()> {
        let seq = self.inner.next_sequence().await;
        let mut call = RollbackCall::new(seq);
        self.inner.call(&mut call).await
    }

    /// Cheap liveness check.
    pub async fn ping(&self) -> Result<()> {
        let seq = self.inner.next_sequence().await;
        let mut call = PingCall::new(seq);
        self.inner.call(&mut call).await
    }

    /// Cancel the in-flight call from any task. Idempotent; the cancelled
    /// call returns `CallCancelled` and the connection stays usable.
    pub fn break_external(&self) {
        self.inner.break_signal.raise();
    }

    /// A cursor over an already-open server cursor id: REF CURSOR outputs
    /// and implicit result sets. The first fetch picks up the column
    /// metadata from the server's describe.
    pub fn ref_cursor(&self, cursor_id: u16) -> Cursor {
        Cursor::for_cursor_id(self.downgrade(), cursor_id)
    }

    /// Event subscription (CQN) needs the notification listener of the
    /// full driver; the core refuses it.
    pub fn subscribe(&self) -> Result<()> {
        Err(Error::NotSupported("event subscription".into()))
    }

    /// Create a session-duration temporary LOB.
    pub async fn create_lob(&self, ora_type: OraType) -> Result<Lob> {
        if !matches!(ora_type, OraType::Clob | OraType::Blob) {
            return Err(Error::Interface(
                "temporary LOBs are CLOB or BLOB".into(),
            ));
        }
        let seq = self.inner.next_sequence().await;
        let mut call = LobCall::create_temp(ora_type, seq);
        self.inner.call(&mut call).await?;
        let locator_bytes = call
            .outcome
            .updated_locator
            .ok_or_else(|| Error::Protocol("server returned no temporary locator".into()))?;
        let locator = LobLocator::new(
            locator_bytes,
            ora_type,
            crate::types::lob::default_charset_form(ora_type),
        );
        Ok(Lob::new(self.downgrade(), locator))
    }

    /// Wrap a fetched locator in a LOB handle bound to this connection.
    pub fn lob(&self, locator: LobLocator) -> Lob {
        Lob::new(self.downgrade(), locator)
    }

    /// Fetch (and cache) the descriptor of a named object type.
    ///
    /// The dictionary is consulted on a miss; attribute order is fixed
    /// once cached.
    pub async fn get_type(&self, name: &str) -> Result<Arc<DbObjectType>> {
        let key = TypeKey::parse(name, &self.inner.params.username)?;
        if let Some(cached) = self
            .inner
            .type_cache
            .lock()
            .expect("type cache poisoned")
            .get(&key)
        {
            return Ok(cached);
        }

        let mut cursor = self.cursor();
        let schema = crate::row::Value::from(key.schema.as_str());
        let type_name = crate::row::Value::from(key.name.as_str());

        cursor
            .execute(dbobject::type_lookup_sql(), &[schema.clone(), type_name.clone()])
            .await?;
        let head = cursor
            .fetchone()
            .await?
            .ok_or_else(|| Error::Interface(format!("type {key} does not exist")))?;
        let oid = head
            .get(0)
            .and_then(|v| v.as_bytes().map(|b| b.to_vec()))
            .unwrap_or_default();
        let version = head.get(1).and_then(|v| v.as_i64()).unwrap_or(0) as u32;
        let typecode = head
            .get(2)
            .and_then(|v| v.as_str())
            .unwrap_or("OBJECT")
            .to_string();

        cursor
            .execute(dbobject::attribute_lookup_sql(), &[schema, type_name])
            .await?;
        let mut attributes = Vec::new();
        while let Some(row) = cursor.fetchone().await? {
            let attr_name = row.get(0).and_then(|v| v.as_str()).unwrap_or("").to_string();
            let type_text = row.get(1).and_then(|v| v.as_str()).unwrap_or("");
            let ora_type = dbobject::ora_type_from_dictionary(type_text);
            let object_type = if ora_type.is_none() {
                let owner = row.get(5).and_then(|v| v.as_str()).unwrap_or(&key.schema);
                Some(TypeKey::parse(
                    &format!("{owner}.{type_text}"),
                    &key.schema,
                )?)
            } else {
                None
            };
            attributes.push(DbObjectAttr {
                name: attr_name,
                ora_type: ora_type.unwrap_or(OraType::Object),
                max_size: row.get(2).and_then(|v| v.as_i64()).unwrap_or(0) as u32,
                precision: row.get(3).and_then(|v| v.as_i64()).unwrap_or(0) as u8,
                scale: row.get(4).and_then(|v| v.as_i64()).unwrap_or(0) as i8,
                object_type,
            });
        }

        let descriptor = DbObjectType {
            key: key.clone(),
            oid,
            version,
            is_collection: typecode.contains("COLLECTION"),
            collection_kind: None,
            element_type: None,
            element_object: None,
            attributes,
        };
        Ok(self
            .inner
            .type_cache
            .lock()
            .expect("type cache poisoned")
            .insert(descriptor))
    }

    /// Release a DRCP session. Pooled callers pass `deauthenticate =
    /// false`; standalone close passes true.
    pub async fn session_release(&self, deauthenticate: bool) -> Result<()> {
        let tag = self.inner.tag.lock().expect("tag lock poisoned").clone();
        let seq = self.inner.next_sequence().await;
        let mut call = SessionReleaseCall::new(seq, deauthenticate, tag);
        self.inner.call(&mut call).await
    }

    /// Orderly close: rollback state is abandoned by the logoff itself.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner
            .stmt_cache
            .lock()
            .expect("stmt cache poisoned")
            .clear();
        let mut engine = self.inner.engine.lock().await;
        engine.close().await;
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.description.endpoint_key())
            .field("user", &self.inner.params.username)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_defaults() {
        let info = ServerInfo::default();
        assert!(info.banner.is_empty());
        assert_eq!(info.session_id, 0);
    }
}
