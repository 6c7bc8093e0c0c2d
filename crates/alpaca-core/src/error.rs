// src/error.rs
use std::io;

use thiserror::Error;

use crate::slab::ConnId;

/// Central error type for the alpaca connection core.
///
/// No-op conditions (empty input, a connection that is already closing, a
/// batch that is already staged) are not errors: they are reported through
/// `0`, `false` or `None` returns by the operations themselves.
#[derive(Debug, Error)]
pub enum AlpacaError {
    /// Underlying I/O error from the OS or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer performed an orderly shutdown (a read returned zero bytes).
    #[error("peer closed the connection")]
    PeerClosed,

    /// The connection was created without the endpoint the operation needs.
    #[error("connection has no {0} endpoint")]
    NoEndpoint(&'static str),

    /// A buffer could not grow to the requested capacity.
    #[error("out of memory growing buffer to {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The connection slab reached its maximum capacity.
    #[error("connection slab is full ({capacity} connections)")]
    SlabFull { capacity: usize },

    /// The handle does not name a live connection (never existed or freed).
    #[error("unknown connection {0}")]
    UnknownConnection(ConnId),
}

impl AlpacaError {
    /// True when the error is a nonblocking syscall that would have blocked.
    ///
    /// Event loops usually retry on the next readiness notification instead
    /// of closing the connection.
    pub fn is_would_block(&self) -> bool {
        matches!(self, AlpacaError::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

pub type AlpacaResult<T> = Result<T, AlpacaError>;
