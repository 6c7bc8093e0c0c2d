// src/server.rs
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::config::ServerConfig;
use crate::conn::{ConnFlags, Connection, Endpoints, PeerAddr};
use crate::error::{AlpacaError, AlpacaResult};
use crate::hooks::ServerHooks;
use crate::metrics::{MetricsSnapshot, ServerMetrics};
use crate::slab::{ConnId, ConnectionSlab};
use crate::staging::WriteState;
use crate::waker::Waker;

/// Owner of a set of connections and the single lock that guards them.
///
/// Every buffer and flag mutation on any connection happens through a
/// [`ServerGuard`]. The convenience methods on `Server` take the lock for
/// exactly one operation.
pub struct Server {
    state: Mutex<Shared>,
    hooks: Option<Arc<dyn ServerHooks>>,
    waker: Arc<Waker>,
    metrics: Arc<ServerMetrics>,
    config: ServerConfig,
}

/// Everything the server lock guards.
struct Shared {
    slab: ConnectionSlab,
    /// Receive buffer for `read_from_socket`, sized once from the config.
    scratch: Box<[u8]>,
}

impl Server {
    pub fn new(config: ServerConfig) -> AlpacaResult<Self> {
        let shared = Shared {
            slab: ConnectionSlab::new(config.max_connections),
            scratch: vec![0u8; config.read_chunk_size.max(1)].into_boxed_slice(),
        };
        Ok(Self {
            state: Mutex::new(shared),
            hooks: None,
            waker: Arc::new(Waker::new()?),
            metrics: Arc::new(ServerMetrics::new()),
            config,
        })
    }

    /// Install the join/leave/pre-write/timeout callbacks.
    pub fn hooks<H: ServerHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Take the server lock.
    ///
    /// Not reentrant: taking it again on the same thread deadlocks.
    pub fn lock(&self) -> ServerGuard<'_> {
        ServerGuard {
            state: self.state.lock(),
            server: self,
        }
    }

    // ---- Lifecycle ----

    /// Create a connection and link it into the server.
    ///
    /// Address resolution happens before the lock is taken. Returns
    /// `Ok(None)` when the join hook rejects the connection, in which case it
    /// has already been freed. On `SlabFull` the endpoints are closed unless
    /// `KEEP_OPEN` is set.
    pub fn create(
        &self,
        endpoints: Endpoints,
        addr: Option<SocketAddr>,
        flags: ConnFlags,
    ) -> AlpacaResult<Option<ConnId>> {
        let peer = addr.map(|a| PeerAddr::resolve(a, self.config.reverse_dns));
        let conn = Connection::new(endpoints, peer, flags, self.waker.clone());

        let mut guard = self.lock();
        let id = guard.state.slab.insert(conn)?;
        self.metrics.inc_conn();

        if let Some(hooks) = self.hooks.as_deref() {
            let accepted = guard.state.slab.get_mut(id).is_some_and(|c| hooks.on_join(c));
            if !accepted {
                guard.free(id);
                self.metrics.inc_rejected();
                tracing::debug!(conn = %id, "connection rejected by join hook");
                return Ok(None);
            }
        }

        if let Some(conn) = guard.state.slab.get(id) {
            tracing::debug!(
                conn = %id,
                ip = conn.ip_address().unwrap_or("-"),
                host = conn.hostname().unwrap_or("-"),
                "connection created"
            );
        }
        Ok(Some(id))
    }

    /// Destroy a connection. `false` if `id` is not live.
    pub fn free(&self, id: ConnId) -> bool {
        self.lock().free(id)
    }

    pub fn close(&self, id: ConnId) -> bool {
        self.lock().close(id)
    }

    // ---- I/O ----

    pub fn read(&self, id: ConnId, out: &mut [u8]) -> usize {
        self.lock().read(id, out)
    }

    pub fn read_from_socket(&self, id: ConnId) -> AlpacaResult<usize> {
        self.lock().read_from_socket(id)
    }

    pub fn write(&self, id: ConnId, buf: &[u8]) -> AlpacaResult<usize> {
        self.lock().write(id, buf)
    }

    pub fn write_str(&self, id: ConnId, text: &str) -> AlpacaResult<usize> {
        self.lock().write(id, text.as_bytes())
    }

    pub fn stage_output(&self, id: ConnId) -> Option<usize> {
        self.lock().stage_output(id)
    }

    pub fn drain_to_socket(&self, id: ConnId) -> AlpacaResult<usize> {
        self.lock().drain_to_socket(id)
    }

    // ---- Timeouts ----

    pub fn set_timeout(&self, id: ConnId, seconds: f64) -> bool {
        self.lock().set_timeout(id, seconds)
    }

    /// How long the event loop may wait before some deadline is due.
    /// `None` when no connection has a deadline.
    pub fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        self.lock()
            .next_deadline()
            .map(|d| d.saturating_duration_since(now))
    }

    /// Clear every deadline that is due at `now`, run the timeout hook for
    /// each, and return the affected connections.
    pub fn expire_timeouts(&self, now: Instant) -> Vec<ConnId> {
        self.lock().expire_timeouts(now)
    }

    // ---- Accessors ----

    /// Run `f` on a connection under the lock.
    pub fn with_connection<R>(
        &self,
        id: ConnId,
        f: impl FnOnce(&mut Connection) -> R,
    ) -> Option<R> {
        self.lock().get_mut(id).map(f)
    }

    pub fn ids(&self) -> Vec<ConnId> {
        self.lock().ids()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn waker(&self) -> &Waker {
        &self.waker
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let mut guard = self.lock();
        for id in guard.ids() {
            guard.free(id);
        }
    }
}

/// Scoped access to the server's connections while holding its lock.
pub struct ServerGuard<'a> {
    state: MutexGuard<'a, Shared>,
    server: &'a Server,
}

impl ServerGuard<'_> {
    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.state.slab.get(id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.state.slab.get_mut(id)
    }

    fn live(&mut self, id: ConnId) -> AlpacaResult<&mut Connection> {
        self.state.slab.get_mut(id).ok_or(AlpacaError::UnknownConnection(id))
    }

    /// Live connections, most recently created first.
    pub fn ids(&self) -> Vec<ConnId> {
        self.state.slab.ids()
    }

    /// Connections with output queued or a batch in flight.
    pub fn with_pending_output(&self) -> Vec<ConnId> {
        self.state.slab
            .iter()
            .filter(|c| c.write_state() != WriteState::Idle)
            .map(|c| c.id())
            .collect()
    }

    /// Connections that were asked to close.
    pub fn closing(&self) -> Vec<ConnId> {
        self.state.slab
            .iter()
            .filter(|c| c.is_closing())
            .map(|c| c.id())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.slab.is_empty()
    }

    /// Destroy a connection: leave hook, one best-effort flush, extensions,
    /// endpoints (unless KEEP_OPEN), then unlink.
    pub fn free(&mut self, id: ConnId) -> bool {
        let server = self.server;
        let hooks = server.hooks.as_deref();
        let Some(conn) = self.state.slab.get_mut(id) else {
            return false;
        };

        if let Some(hooks) = hooks {
            hooks.on_leave(conn);
        }

        let _ = conn.stage_output(hooks);
        if conn.write_state() == WriteState::Draining {
            match conn.drain_to_socket() {
                Ok(n) => server.metrics.add_written(n),
                Err(e) => tracing::trace!(conn = %id, error = %e, "final flush dropped"),
            }
        }

        conn.release();
        self.state.slab.remove(id);
        server.metrics.dec_conn();
        tracing::debug!(conn = %id, "connection freed");
        true
    }

    pub fn close(&mut self, id: ConnId) -> bool {
        self.state.slab.get_mut(id).is_some_and(Connection::close)
    }

    pub fn read(&mut self, id: ConnId, out: &mut [u8]) -> usize {
        self.state.slab.get_mut(id).map_or(0, |c| c.read(out))
    }

    pub fn read_from_socket(&mut self, id: ConnId) -> AlpacaResult<usize> {
        let Shared { slab, scratch } = &mut *self.state;
        let conn = slab.get_mut(id).ok_or(AlpacaError::UnknownConnection(id))?;
        let n = conn.read_from_socket(scratch)?;
        self.server.metrics.add_read(n);
        Ok(n)
    }

    pub fn write(&mut self, id: ConnId, buf: &[u8]) -> AlpacaResult<usize> {
        self.live(id)?.write(buf)
    }

    pub fn stage_output(&mut self, id: ConnId) -> Option<usize> {
        let hooks = self.server.hooks.as_deref();
        self.state.slab.get_mut(id)?.stage_output(hooks)
    }

    pub fn drain_to_socket(&mut self, id: ConnId) -> AlpacaResult<usize> {
        let n = self.live(id)?.drain_to_socket()?;
        self.server.metrics.add_written(n);
        Ok(n)
    }

    pub fn set_timeout(&mut self, id: ConnId, seconds: f64) -> bool {
        self.state.slab
            .get_mut(id)
            .is_some_and(|c| c.set_timeout(seconds))
    }

    /// Earliest deadline across all connections.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.slab.iter().filter_map(Connection::deadline).min()
    }

    pub fn expire_timeouts(&mut self, now: Instant) -> Vec<ConnId> {
        let hooks = self.server.hooks.as_deref();
        let mut expired = Vec::new();
        for conn in self.state.slab.iter_mut() {
            if !conn.is_timed_out(now) {
                continue;
            }
            conn.deadline = None;
            tracing::debug!(conn = %conn.id(), "connection timed out");
            if let Some(hooks) = hooks {
                hooks.on_timeout(conn);
            }
            expired.push(conn.id());
        }
        expired
    }
}
