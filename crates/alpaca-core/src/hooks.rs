// src/hooks.rs
use crate::conn::Connection;
use crate::staging::OutputWindow;

/// Lifecycle callbacks a server may install.
///
/// Every method has a no-op default, so implementors only override the
/// hooks they need. Hooks run synchronously while the server lock is held:
/// they must not block, and they never receive the server itself, so they
/// cannot try to take the (non-reentrant) lock again.
pub trait ServerHooks: Send + Sync {
    /// Called once a new connection is linked into the server. Returning
    /// `false` vetoes it: the connection is freed before `create` returns.
    fn on_join(&self, _conn: &mut Connection) -> bool {
        true
    }

    /// Called first thing when a connection is freed, while its buffers and
    /// extensions are still intact.
    fn on_leave(&self, _conn: &mut Connection) {}

    /// Called once per staged batch with the queued output. The window may
    /// be rewritten in place or replaced wholesale (framing, compression).
    fn on_pre_write(&self, _output: &mut OutputWindow<'_>) {}

    /// Called by [`Server::expire_timeouts`](crate::Server::expire_timeouts)
    /// for each connection whose deadline has passed. The deadline is
    /// already cleared; set a new one to keep the timer running.
    fn on_timeout(&self, _conn: &mut Connection) {}
}
