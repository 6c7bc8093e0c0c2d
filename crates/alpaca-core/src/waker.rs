// src/waker.rs
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::AlpacaResult;
use crate::syscalls;

/// Self-pipe used to interrupt the server's wait step.
///
/// The event loop registers [`Waker::read_fd`] for readability. Any
/// connection can call [`Waker::wake`]; each wake writes one byte, and once
/// the pipe is full further wakes are absorbed by the bytes already queued.
#[derive(Debug)]
pub struct Waker {
    read_fd: RawFd,
    write_fd: RawFd,
    signals: AtomicUsize,
}

impl Waker {
    pub fn new() -> AlpacaResult<Self> {
        let (read_fd, write_fd) = syscalls::create_pipe()?;
        Ok(Self {
            read_fd,
            write_fd,
            signals: AtomicUsize::new(0),
        })
    }

    /// Nudge the event loop so it recomputes interest sets and deadlines.
    pub fn wake(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = syscalls::write_nonblocking(self.write_fd, &[1]) {
            // A full pipe already guarantees a wakeup
            if !e.is_would_block() {
                tracing::warn!(error = %e, "failed to signal server wakeup pipe");
            }
        }
    }

    /// Consume pending wakeup bytes. Returns the bytes drained.
    ///
    /// A wake racing with this call either lands before the pipe reads empty
    /// (and is consumed here) or leaves its byte behind for the next wait.
    pub fn drain(&self) -> usize {
        let mut buf = [0u8; 64];
        let mut total = 0;
        while let Ok(n) = syscalls::read_nonblocking(self.read_fd, &mut buf) {
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }

    /// Descriptor to register for readability in the event loop.
    #[inline]
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Number of wake requests since creation, absorbed ones included.
    #[inline]
    pub fn signals(&self) -> usize {
        self.signals.load(Ordering::Relaxed)
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        syscalls::close_fd(self.read_fd);
        syscalls::close_fd(self.write_fd);
    }
}
