// src/conn.rs
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::GrowBuf;
use crate::error::{AlpacaError, AlpacaResult};
use crate::extension::Extensions;
use crate::slab::ConnId;
use crate::syscalls;
use crate::waker::Waker;

/// Default size of a single socket read.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Connection flag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnFlags(u8);

impl ConnFlags {
    /// Leave the endpoints open when the connection is freed.
    pub const KEEP_OPEN: ConnFlags = ConnFlags(1 << 0);
    /// Close requested; no more output is queued.
    pub const CLOSING: ConnFlags = ConnFlags(1 << 1);
    /// Output queued since the last full drain.
    pub const WROTE: ConnFlags = ConnFlags(1 << 2);
    /// A staged batch is being drained.
    pub const WRITING: ConnFlags = ConnFlags(1 << 3);

    #[inline]
    pub const fn empty() -> Self {
        ConnFlags(0)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: ConnFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: ConnFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: ConnFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for ConnFlags {
    type Output = ConnFlags;

    fn bitor(self, rhs: ConnFlags) -> ConnFlags {
        ConnFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConnFlags {
    fn bitor_assign(&mut self, rhs: ConnFlags) {
        self.0 |= rhs.0;
    }
}

/// Input and output descriptors of a connection.
///
/// Both may be the same socket, two halves of a split duplex (e.g. stdin and
/// stdout), or absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub input: Option<RawFd>,
    pub output: Option<RawFd>,
}

impl Endpoints {
    /// One descriptor used for both directions.
    pub fn duplex(fd: RawFd) -> Self {
        Self {
            input: Some(fd),
            output: Some(fd),
        }
    }

    pub fn split(input: RawFd, output: RawFd) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
        }
    }

    /// No descriptors: a purely programmatic connection.
    pub fn none() -> Self {
        Self {
            input: None,
            output: None,
        }
    }

    /// Close each distinct descriptor once.
    fn close(&mut self) {
        let input = self.input.take();
        let output = self.output.take();
        if let Some(fd) = input {
            syscalls::close_fd(fd);
        }
        if let Some(fd) = output {
            if Some(fd) != input {
                syscalls::close_fd(fd);
            }
        }
    }
}

/// Peer address plus its best-effort textual forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub addr: SocketAddr,
    pub ip_address: Option<String>,
    pub hostname: Option<String>,
}

impl PeerAddr {
    /// Record `addr`, optionally resolving its reverse DNS name.
    ///
    /// The lookup may block for as long as the system resolver does.
    pub fn resolve(addr: SocketAddr, reverse_dns: bool) -> Self {
        let hostname = if reverse_dns {
            syscalls::reverse_lookup(&addr)
        } else {
            None
        };
        Self {
            addr,
            ip_address: Some(addr.ip().to_string()),
            hostname,
        }
    }
}

/// One peer's duplex byte stream with its buffers, flags and deadline.
///
/// Connections live inside the server's slab and are only reachable through
/// the server lock, which is what serializes buffer and flag mutation.
pub struct Connection {
    pub(crate) id: ConnId,
    endpoints: Endpoints,
    peer: Option<PeerAddr>,
    pub(crate) input: GrowBuf,
    pub(crate) output: GrowBuf,
    pub(crate) flags: ConnFlags,
    pub(crate) output_max: usize,
    pub(crate) deadline: Option<Instant>,
    extensions: Extensions,
    pub(crate) waker: Arc<Waker>,
}

impl Connection {
    pub(crate) fn new(
        endpoints: Endpoints,
        peer: Option<PeerAddr>,
        flags: ConnFlags,
        waker: Arc<Waker>,
    ) -> Self {
        // Staging state is never inherited from the caller
        let mut flags = flags;
        flags.remove(ConnFlags::WROTE | ConnFlags::WRITING);

        Self {
            id: ConnId::default(),
            endpoints,
            peer,
            input: GrowBuf::new(),
            output: GrowBuf::new(),
            flags,
            output_max: 0,
            deadline: None,
            extensions: Extensions::new(),
            waker,
        }
    }

    pub(crate) fn set_id(&mut self, id: ConnId) {
        self.id = id;
    }

    #[inline]
    pub fn id(&self) -> ConnId {
        self.id
    }

    // ---- Lifecycle ----

    /// Request close. Returns `false` if a close was already requested.
    pub fn close(&mut self) -> bool {
        if self.flags.contains(ConnFlags::CLOSING) {
            return false;
        }
        self.flags.insert(ConnFlags::CLOSING);
        true
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.flags.contains(ConnFlags::CLOSING)
    }

    /// Drop extensions and close endpoints (unless KEEP_OPEN).
    pub(crate) fn release(&mut self) {
        let destroyed = self.extensions.clear();
        if destroyed > 0 {
            tracing::trace!(conn = %self.id, destroyed, "extensions destroyed");
        }
        if self.flags.contains(ConnFlags::KEEP_OPEN) {
            self.endpoints = Endpoints::none();
        } else {
            self.endpoints.close();
        }
    }

    // ---- Input ----

    /// Copy buffered input into `out`; `0` when nothing is buffered.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.input.fetch(out)
    }

    /// One receive of up to `scratch.len()` bytes from the input endpoint,
    /// appended to the input buffer. `scratch` is caller-owned so it can be
    /// reused across reads.
    ///
    /// `Err(PeerClosed)` on end of stream; syscall failures (including
    /// `WouldBlock`) are returned as-is. The connection is never closed here.
    pub fn read_from_socket(&mut self, scratch: &mut [u8]) -> AlpacaResult<usize> {
        let fd = self.endpoints.input.ok_or(AlpacaError::NoEndpoint("input"))?;
        if scratch.is_empty() {
            return Ok(0);
        }

        let n = syscalls::read_nonblocking(fd, scratch)?;
        if n == 0 {
            return Err(AlpacaError::PeerClosed);
        }
        self.input.append(&scratch[..n])?;
        Ok(n)
    }

    // ---- Output ----

    /// Queue `buf` for output. Returns `0` without touching the buffer when
    /// `buf` is empty or the connection is closing.
    pub fn write(&mut self, buf: &[u8]) -> AlpacaResult<usize> {
        if buf.is_empty() || self.is_closing() {
            return Ok(0);
        }
        let n = self.output.append(buf)?;
        self.mark_wrote();
        Ok(n)
    }

    pub fn write_str(&mut self, text: &str) -> AlpacaResult<usize> {
        self.write(text.as_bytes())
    }

    /// Flag queued output and wake the event loop so it polls for
    /// writability.
    pub(crate) fn mark_wrote(&mut self) {
        self.flags.insert(ConnFlags::WROTE);
        self.waker.wake();
    }

    // ---- Extensions ----

    /// Attach a named payload; a previous payload under `name` is returned.
    pub fn attach<T: Any + Send>(
        &mut self,
        name: &str,
        payload: T,
    ) -> Option<Box<dyn Any + Send>> {
        self.extensions.attach(name, payload)
    }

    pub fn extension<T: Any + Send>(&self, name: &str) -> Option<&T> {
        self.extensions.get(name)
    }

    pub fn extension_mut<T: Any + Send>(&mut self, name: &str) -> Option<&mut T> {
        self.extensions.get_mut(name)
    }

    pub fn detach(&mut self, name: &str) -> Option<Box<dyn Any + Send>> {
        self.extensions.detach(name)
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    // ---- Metadata ----

    #[inline]
    pub fn flags(&self) -> ConnFlags {
        self.flags
    }

    #[inline]
    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn peer(&self) -> Option<&PeerAddr> {
        self.peer.as_ref()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.peer.as_ref().and_then(|p| p.ip_address.as_deref())
    }

    pub fn hostname(&self) -> Option<&str> {
        self.peer.as_ref().and_then(|p| p.hostname.as_deref())
    }

    #[inline]
    pub fn input(&self) -> &GrowBuf {
        &self.input
    }

    #[inline]
    pub fn output(&self) -> &GrowBuf {
        &self.output
    }

    /// Bytes left in the batch being drained; meaningful while WRITING.
    #[inline]
    pub fn output_max(&self) -> usize {
        self.output_max
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoints", &self.endpoints)
            .field("peer", &self.peer)
            .field("flags", &self.flags)
            .field("input_len", &self.input.remaining())
            .field("output_len", &self.output.remaining())
            .field("output_max", &self.output_max)
            .field("deadline", &self.deadline)
            .field("extensions", &self.extensions)
            .finish()
    }
}
