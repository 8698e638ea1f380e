//! Client-side connection pool.
//!
//! A bounded set of connections with a LIFO free list. `acquire` validates
//! idle connections with a ping once `ping_interval` has elapsed since
//! their last use; `release` rolls back any open transaction, releases a
//! DRCP session when one is held, runs the session callback, and returns
//! the connection to the free list. The capacity invariant `busy + free <=
//! max` holds everywhere except inside a FORCEGET overdraft, whose extra
//! connections are closed on release instead of pooled.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use crate::config::{ConnectParams, Description, GetMode, PoolParams};
use crate::connection::Connection;
use crate::error::{Error, Result};

/// Callback run on every release to reset session state.
pub type SessionCallback =
    Arc<dyn Fn(Connection) -> Pin<Box<dyn Future<Output = Result<Connection>> + Send>> + Send + Sync>;

struct IdleConn {
    conn: Connection,
    last_used: Instant,
}

struct PoolState {
    free: VecDeque<IdleConn>,
    busy: usize,
    /// Connections beyond `max` handed out under FORCEGET
    overdraft: usize,
    closed: bool,
}

struct PoolInner {
    description: Description,
    connect_params: ConnectParams,
    params: PoolParams,
    state: Mutex<PoolState>,
    released: Notify,
    session_callback: Option<SessionCallback>,
}

/// A bounded pool of connections to one endpoint.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

/// A connection checked out of a pool. Dropping it without
/// [`PooledConnection::release`] leaks the slot; release explicitly.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Pool,
    counted: bool,
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection already released")
    }
}

impl PooledConnection {
    /// Return the connection to the pool, rolling back any in-progress
    /// transaction first.
    pub async fn release(mut self) -> Result<()> {
        let conn = self.conn.take().expect("connection already released");
        self.pool.clone().release_inner(conn, self.counted).await
    }
}

impl Pool {
    /// Create a pool, eagerly opening `min` connections.
    pub async fn create(
        description: Description,
        mut connect_params: ConnectParams,
        params: PoolParams,
        session_callback: Option<SessionCallback>,
    ) -> Result<Self> {
        if params.max == 0 || params.min > params.max {
            return Err(Error::Interface(format!(
                "pool bounds min={} max={} are invalid",
                params.min, params.max
            )));
        }
        connect_params.stmt_cache_size = params.stmt_cache_size;

        let pool = Self {
            inner: Arc::new(PoolInner {
                description,
                connect_params,
                params,
                state: Mutex::new(PoolState {
                    free: VecDeque::new(),
                    busy: 0,
                    overdraft: 0,
                    closed: false,
                }),
                released: Notify::new(),
                session_callback,
            }),
        };

        for _ in 0..pool.inner.params.min {
            let conn = pool.open_connection().await?;
            let mut state = pool.inner.state.lock().await;
            state.free.push_back(IdleConn {
                conn,
                last_used: Instant::now(),
            });
        }
        tracing::debug!(
            min = pool.inner.params.min,
            max = pool.inner.params.max,
            "pool created"
        );
        Ok(pool)
    }

    async fn open_connection(&self) -> Result<Connection> {
        Connection::connect(
            self.inner.description.clone(),
            self.inner.connect_params.clone(),
        )
        .await
    }

    /// Number of idle connections.
    pub async fn open_count(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.free.len() + state.busy
    }

    /// Number of connections handed out.
    pub async fn busy_count(&self) -> usize {
        self.inner.state.lock().await.busy
    }

    /// Acquire a connection per the pool's getmode.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        match self.inner.params.getmode {
            GetMode::Wait => self.acquire_waiting(None).await,
            GetMode::TimedWait => {
                self.acquire_waiting(Some(self.inner.params.wait_timeout)).await
            }
            GetMode::NoWait => self.try_acquire().await?.ok_or_else(|| {
                Error::Interface("pool is at capacity and getmode is NOWAIT".into())
            }),
            GetMode::ForceGet => match self.try_acquire().await? {
                Some(conn) => Ok(conn),
                None => {
                    // Overdraft: open beyond max, closed again on release.
                    let conn = self.open_connection().await?;
                    let mut state = self.inner.state.lock().await;
                    state.overdraft += 1;
                    tracing::debug!(overdraft = state.overdraft, "FORCEGET overdraft");
                    Ok(PooledConnection {
                        conn: Some(conn),
                        pool: self.clone(),
                        counted: false,
                    })
                }
            },
        }
    }

    async fn acquire_waiting(&self, deadline: Option<std::time::Duration>) -> Result<PooledConnection> {
        let start = Instant::now();
        loop {
            if let Some(conn) = self.try_acquire().await? {
                return Ok(conn);
            }
            let wait = self.inner.released.notified();
            match deadline {
                Some(limit) => {
                    let elapsed = start.elapsed();
                    if elapsed >= limit {
                        return Err(Error::Timeout(limit));
                    }
                    if timeout(limit - elapsed, wait).await.is_err() {
                        return Err(Error::Timeout(limit));
                    }
                }
                None => wait.await,
            }
        }
    }

    /// One attempt: pop LIFO, validate, or open below capacity. `Ok(None)`
    /// means the pool is at capacity with nothing free.
    async fn try_acquire(&self) -> Result<Option<PooledConnection>> {
        loop {
            let candidate = {
                let mut state = self.inner.state.lock().await;
                if state.closed {
                    return Err(Error::ConnectionClosed);
                }
                match state.free.pop_back() {
                    Some(idle) => {
                        state.busy += 1;
                        Some(idle)
                    }
                    None if state.busy < self.inner.params.max => {
                        state.busy += 1;
                        None
                    }
                    None => return Ok(None),
                }
            };

            match candidate {
                Some(idle) => {
                    match self.validate(idle).await {
                        Some(conn) => {
                            return Ok(Some(PooledConnection {
                                conn: Some(conn),
                                pool: self.clone(),
                                counted: true,
                            }))
                        }
                        None => {
                            // Dead connection dropped; undo the claim and
                            // try the next candidate.
                            let mut state = self.inner.state.lock().await;
                            state.busy -= 1;
                            continue;
                        }
                    }
                }
                None => {
                    match self.open_connection().await {
                        Ok(conn) => {
                            return Ok(Some(PooledConnection {
                                conn: Some(conn),
                                pool: self.clone(),
                                counted: true,
                            }))
                        }
                        Err(e) => {
                            let mut state = self.inner.state.lock().await;
                            state.busy -= 1;
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Ping-validate an idle connection when its idle age crosses the
    /// ping interval. Returns None for dead connections.
    async fn validate(&self, idle: IdleConn) -> Option<Connection> {
        if idle.conn.is_closed() {
            return None;
        }
        let needs_ping = self
            .inner
            .params
            .ping_interval
            .map(|interval| idle.last_used.elapsed() >= interval)
            .unwrap_or(false);
        if !needs_ping {
            return Some(idle.conn);
        }
        match idle.conn.ping().await {
            Ok(()) => Some(idle.conn),
            Err(e) => {
                tracing::debug!(error = %e, "pooled connection failed ping");
                let _ = idle.conn.close().await;
                None
            }
        }
    }

    async fn release_inner(self, conn: Connection, counted: bool) -> Result<()> {
        // Roll back whatever the caller left open.
        if !conn.is_closed() {
            let _ = conn.rollback().await;
            let _ = conn.session_release(false).await;
        }

        let conn = match (&self.inner.session_callback, conn.is_closed()) {
            (Some(callback), false) => match callback(conn).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::debug!(error = %e, "session callback failed, dropping connection");
                    self.forget(counted).await;
                    return Ok(());
                }
            },
            (_, _) => conn,
        };

        let mut state = self.inner.state.lock().await;
        if !counted {
            // FORCEGET overdraft connections never join the free list.
            state.overdraft = state.overdraft.saturating_sub(1);
            drop(state);
            let _ = conn.close().await;
            self.inner.released.notify_one();
            return Ok(());
        }

        state.busy = state.busy.saturating_sub(1);
        if conn.is_closed() || state.closed {
            drop(state);
            let _ = conn.close().await;
        } else {
            state.free.push_back(IdleConn {
                conn,
                last_used: Instant::now(),
            });
            drop(state);
        }
        self.inner.released.notify_one();
        Ok(())
    }

    async fn forget(&self, counted: bool) {
        let mut state = self.inner.state.lock().await;
        if counted {
            state.busy = state.busy.saturating_sub(1);
        } else {
            state.overdraft = state.overdraft.saturating_sub(1);
        }
        drop(state);
        self.inner.released.notify_one();
    }

    /// Prune idle connections above `min` that have outlived
    /// `max_idle_time`.
    pub async fn prune_idle(&self) {
        let Some(max_idle) = self.inner.params.max_idle_time else {
            return;
        };
        let mut victims = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            while state.free.len() + state.busy > self.inner.params.min {
                match state.free.front() {
                    Some(idle) if idle.last_used.elapsed() >= max_idle => {
                        victims.push(state.free.pop_front().unwrap());
                    }
                    _ => break,
                }
            }
        }
        for idle in victims {
            let _ = idle.conn.close().await;
        }
    }

    /// Close every pooled connection and refuse further acquires.
    pub async fn close(&self) -> Result<()> {
        let drained = {
            let mut state = self.inner.state.lock().await;
            state.closed = true;
            std::mem::take(&mut state.free)
        };
        for idle in drained {
            let _ = idle.conn.close().await;
        }
        self.inner.released.notify_waiters();
        Ok(())
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("endpoint", &self.inner.description.endpoint_key())
            .field("max", &self.inner.params.max)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_bounds_rejected() {
        let description: Description = "h:1521/S".parse().unwrap();
        let params = PoolParams {
            min: 5,
            max: 2,
            ..Default::default()
        };
        let result = futures_block_on(Pool::create(
            description,
            ConnectParams::default(),
            params,
            None,
        ));
        assert!(matches!(result, Err(Error::Interface(_))));
    }

    #[test]
    fn zero_max_rejected() {
        let description: Description = "h:1521/S".parse().unwrap();
        let params = PoolParams {
            min: 0,
            max: 0,
            ..Default::default()
        };
        let result = futures_block_on(Pool::create(
            description,
            ConnectParams::default(),
            params,
            None,
        ));
        assert!(matches!(result, Err(Error::Interface(_))));
    }

    fn futures_block_on<F: Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
