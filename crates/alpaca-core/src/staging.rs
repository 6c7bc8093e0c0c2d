// src/staging.rs
//! Write staging: freezing queued output into a batch, letting the pre-write
//! hook transform it once, then draining it across partial sends.
//!
//! ```text
//!            write()                 stage_output()
//!   Idle ──────────────▶ Pending ─────────────────▶ Draining
//!     ▲                     ▲                          │
//!     │ full drain,         │ batch done,              │ drain_*()
//!     │ batch done          │ newer output queued      │
//!     └─────────────────────┴──────────────────────────┘
//! ```
//!
//! `output_max` is captured when the batch is staged. Output queued while
//! the batch drains is sent along with it, but the hook only runs again
//! once the staged byte count has gone out.

use std::io;

use crate::buffer::GrowBuf;
use crate::conn::{ConnFlags, Connection};
use crate::error::{AlpacaError, AlpacaResult};
use crate::hooks::ServerHooks;
use crate::slab::ConnId;
use crate::syscalls;

/// Staging state derived from the WROTE and WRITING flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Nothing queued.
    Idle,
    /// Output queued but not yet staged.
    Pending,
    /// A staged batch is being drained.
    Draining,
}

/// The queued output handed to [`ServerHooks::on_pre_write`].
pub struct OutputWindow<'a> {
    conn: ConnId,
    buf: &'a mut GrowBuf,
}

impl<'a> OutputWindow<'a> {
    pub(crate) fn new(conn: ConnId, buf: &'a mut GrowBuf) -> Self {
        Self { conn, buf }
    }

    /// Connection whose output is being staged.
    pub fn conn_id(&self) -> ConnId {
        self.conn
    }

    pub fn data(&self) -> &[u8] {
        self.buf.pending()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.buf.pending_mut()
    }

    pub fn len(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Swap the queued bytes for `bytes`, which may be of any length.
    pub fn replace(&mut self, bytes: &[u8]) -> AlpacaResult<()> {
        self.buf.replace_pending(bytes)
    }

    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate_pending(len)
    }
}

impl Connection {
    pub fn write_state(&self) -> WriteState {
        if self.flags.contains(ConnFlags::WRITING) {
            WriteState::Draining
        } else if self.flags.contains(ConnFlags::WROTE) {
            WriteState::Pending
        } else {
            WriteState::Idle
        }
    }

    /// Freeze queued output into a batch and return its size.
    ///
    /// `None` if nothing was written since the last drain or a batch is
    /// already staged. If the pre-write hook leaves nothing to send, the
    /// connection goes back to idle and `Some(0)` is returned.
    pub fn stage_output(&mut self, hooks: Option<&dyn ServerHooks>) -> Option<usize> {
        if !self.flags.contains(ConnFlags::WROTE) || self.flags.contains(ConnFlags::WRITING) {
            return None;
        }

        if let Some(hooks) = hooks {
            let mut window = OutputWindow::new(self.id, &mut self.output);
            hooks.on_pre_write(&mut window);
        }

        self.output_max = self.output.remaining();
        if self.output_max == 0 {
            self.output.clear();
            self.flags.remove(ConnFlags::WROTE);
            return Some(0);
        }
        self.flags.insert(ConnFlags::WRITING);
        Some(self.output_max)
    }

    /// Make one send attempt of the queued output through `send`.
    ///
    /// Returns `Ok(0)` when no batch is staged. A failed or zero-byte send is
    /// an error and leaves the buffer untouched; closing is up to the caller.
    pub fn drain_with<F>(&mut self, send: F) -> AlpacaResult<usize>
    where
        F: FnOnce(&[u8]) -> AlpacaResult<usize>,
    {
        let queued = self.output.remaining();
        let batch = self.output_max.min(queued);
        if batch == 0 || !self.flags.contains(ConnFlags::WRITING) {
            return Ok(0);
        }

        let sent = match send(self.output.pending()) {
            Ok(0) => Err(AlpacaError::Io(io::ErrorKind::WriteZero.into())),
            other => other,
        }
        .inspect_err(|e| {
            if !e.is_would_block() {
                tracing::warn!(
                    conn = %self.id,
                    bytes = queued,
                    error = %e,
                    "couldn't write to client"
                );
            }
        })?;

        if sent >= queued {
            self.output.clear();
            self.flags.remove(ConnFlags::WROTE);
        } else {
            self.output.consume(sent);
        }

        self.output_max = self.output_max.saturating_sub(sent);
        if self.output_max == 0 {
            self.flags.remove(ConnFlags::WRITING);
        }
        Ok(sent.min(queued))
    }

    /// One non-blocking write of the queued output to the output endpoint.
    pub fn drain_to_socket(&mut self) -> AlpacaResult<usize> {
        let fd = self
            .endpoints()
            .output
            .ok_or(AlpacaError::NoEndpoint("output"))?;
        self.drain_with(|bytes| syscalls::write_nonblocking(fd, bytes))
    }
}
