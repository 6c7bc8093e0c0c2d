// src/buffer.rs
use crate::error::{AlpacaError, AlpacaResult};

/// Capacity allocated by the first append.
pub const INITIAL_CAPACITY: usize = 256;

/// Auto-growing byte buffer with separate length and consumed-position cursors.
///
/// Appends land at `len`, reads start at `pos`. A partial read only moves
/// `pos` forward, so nothing is shifted; a full read resets both cursors and
/// keeps the allocation for reuse.
///
/// Invariants: `pos <= len <= capacity`, and after any append
/// `capacity >= len + 1` with `storage[len] == 0` so the contents can be
/// handed to text-oriented consumers.
#[derive(Debug, Default)]
pub struct GrowBuf {
    storage: Vec<u8>,
    len: usize,
    pos: usize,
}

impl GrowBuf {
    /// An empty buffer. Nothing is allocated until the first append.
    pub const fn new() -> Self {
        Self {
            storage: Vec::new(),
            len: 0,
            pos: 0,
        }
    }

    /// Queue `input` at the end of the buffer, returning the number of bytes
    /// appended (`0` for empty input).
    pub fn append(&mut self, input: &[u8]) -> AlpacaResult<usize> {
        if input.is_empty() {
            return Ok(0);
        }

        let mut capacity = if self.storage.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.storage.len()
        };
        while capacity < self.len + input.len() + 1 {
            capacity = capacity
                .checked_mul(2)
                .ok_or(AlpacaError::OutOfMemory { requested: usize::MAX })?;
        }
        self.grow_to(capacity)?;

        self.storage[self.len..self.len + input.len()].copy_from_slice(input);
        self.len += input.len();
        self.storage[self.len] = 0;
        Ok(input.len())
    }

    /// Copy unconsumed bytes into `output`.
    ///
    /// A short `output` takes a prefix and leaves the rest fetchable; an
    /// `output` that fits everything drains the buffer and resets it.
    pub fn fetch(&mut self, output: &mut [u8]) -> usize {
        let available = self.remaining();
        if output.is_empty() || available == 0 {
            return 0;
        }

        if output.len() < available {
            let n = output.len();
            output.copy_from_slice(&self.storage[self.pos..self.pos + n]);
            self.pos += n;
            n
        } else {
            output[..available].copy_from_slice(&self.storage[self.pos..self.len]);
            self.clear();
            available
        }
    }

    /// The unconsumed bytes, `storage[pos..len]`.
    #[inline]
    pub fn pending(&self) -> &[u8] {
        &self.storage[self.pos..self.len]
    }

    #[inline]
    pub fn pending_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.pos..self.len]
    }

    /// Mark `n` unconsumed bytes as read. Consuming everything resets the buffer.
    pub fn consume(&mut self, n: usize) {
        if n >= self.remaining() {
            self.clear();
        } else {
            self.pos += n;
        }
    }

    /// Replace the unconsumed bytes with `bytes`, growing if needed.
    pub fn replace_pending(&mut self, bytes: &[u8]) -> AlpacaResult<()> {
        self.len = self.pos;
        if let Some(t) = self.storage.get_mut(self.len) {
            *t = 0;
        }
        self.append(bytes)?;
        if self.len == self.pos {
            self.clear();
        }
        Ok(())
    }

    /// Keep only the first `n` unconsumed bytes.
    pub fn truncate_pending(&mut self, n: usize) {
        if n >= self.remaining() {
            return;
        }
        self.len = self.pos + n;
        self.storage[self.len] = 0;
        if n == 0 {
            self.clear();
        }
    }

    /// Reset both cursors without releasing the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
        self.pos = 0;
        if let Some(t) = self.storage.first_mut() {
            *t = 0;
        }
    }

    /// Bytes logically stored, consumed ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn grow_to(&mut self, capacity: usize) -> AlpacaResult<()> {
        let current = self.storage.len();
        if capacity == current {
            return Ok(());
        }
        self.storage
            .try_reserve_exact(capacity - current)
            .map_err(|_| AlpacaError::OutOfMemory {
                requested: capacity,
            })?;
        self.storage.resize(capacity, 0);
        Ok(())
    }
}
