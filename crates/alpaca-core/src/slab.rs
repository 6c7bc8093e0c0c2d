// src/slab.rs
use std::fmt;

use crate::conn::Connection;
use crate::error::{AlpacaError, AlpacaResult};

/// Stable handle to a connection owned by a [`ConnectionSlab`].
///
/// The generation changes every time a slot is freed, so a handle kept past
/// `free` never resolves to the slot's next occupant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId {
    index: u32,
    generation: u32,
}

impl ConnId {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    conn: Option<Connection>,
    // Occupied slots: neighbours in the server's connection list.
    // Free slots: `next` is the next free index.
    prev: Option<u32>,
    next: Option<u32>,
}

/// Arena of connections with an ordered, newest-first connection list.
///
/// Slots are created lazily up to `capacity` and recycled through a free
/// list, so allocation and removal are O(1).
pub struct ConnectionSlab {
    entries: Vec<Slot>,
    capacity: usize,
    head_free: Option<u32>,
    head: Option<u32>,
    active_count: usize,
}

impl ConnectionSlab {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.min(u32::MAX as usize),
            head_free: None,
            head: None,
            active_count: 0,
        }
    }

    /// Store `conn` and link it at the front of the connection list.
    pub fn insert(&mut self, mut conn: Connection) -> AlpacaResult<ConnId> {
        let idx = match self.head_free {
            Some(idx) => {
                self.head_free = self.entries[idx as usize].next;
                idx
            }
            None => {
                if self.entries.len() >= self.capacity {
                    return Err(AlpacaError::SlabFull {
                        capacity: self.capacity,
                    });
                }
                self.entries.push(Slot {
                    generation: 0,
                    conn: None,
                    prev: None,
                    next: None,
                });
                (self.entries.len() - 1) as u32
            }
        };

        let id = ConnId {
            index: idx,
            generation: self.entries[idx as usize].generation,
        };
        conn.set_id(id);

        let old_head = self.head;
        if let Some(h) = old_head {
            self.entries[h as usize].prev = Some(idx);
        }
        let slot = &mut self.entries[idx as usize];
        slot.conn = Some(conn);
        slot.prev = None;
        slot.next = old_head;
        self.head = Some(idx);

        self.active_count += 1;
        Ok(id)
    }

    /// Unlink and return the connection named by `id`.
    pub fn remove(&mut self, id: ConnId) -> Option<Connection> {
        self.get(id)?;

        let idx = id.index;
        let (prev, next) = {
            let slot = &self.entries[idx as usize];
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.entries[p as usize].next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.entries[n as usize].prev = prev;
        }

        let slot = &mut self.entries[idx as usize];
        let conn = slot.conn.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.prev = None;
        slot.next = self.head_free;
        self.head_free = Some(idx);

        self.active_count -= 1;
        conn
    }

    #[inline]
    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.entries
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.conn.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.entries
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.conn.as_mut())
    }

    /// Handles in list order, most recently inserted first.
    pub fn ids(&self) -> Vec<ConnId> {
        let mut out = Vec::with_capacity(self.active_count);
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let slot = &self.entries[idx as usize];
            out.push(ConnId {
                index: idx,
                generation: slot.generation,
            });
            cursor = slot.next;
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.entries.iter().filter_map(|slot| slot.conn.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.entries.iter_mut().filter_map(|slot| slot.conn.as_mut())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.active_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active_count == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
