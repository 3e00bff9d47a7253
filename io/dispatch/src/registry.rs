//! Slab-backed connection table.
//!
//! Slab slots are reused after removal, so every entry carries a generation
//! tag and ids minted for a previous occupant of a slot no longer resolve.

use slab::Slab;

use crate::types::ConnId;

struct Entry<C> {
    generation: u32,
    conn: C,
}

/// Owns registered connections and maps [`ConnId`]s to them.
pub(crate) struct ConnTable<C> {
    conns: Slab<Entry<C>>,
    generation: u32,
}

impl<C> ConnTable<C> {
    pub(crate) fn new() -> Self {
        Self {
            conns: Slab::with_capacity(16),
            generation: 0,
        }
    }

    pub(crate) fn insert(&mut self, conn: C) -> ConnId {
        let generation = self.generation;
        self.generation = self.generation.wrapping_add(1);
        let slot = self.conns.insert(Entry { generation, conn });
        ConnId::with_generation(slot, generation)
    }

    pub(crate) fn get(&self, id: ConnId) -> Option<&C> {
        self.conns
            .get(id.slot())
            .filter(|e| e.generation == id.generation())
            .map(|e| &e.conn)
    }

    pub(crate) fn get_mut(&mut self, id: ConnId) -> Option<&mut C> {
        self.conns
            .get_mut(id.slot())
            .filter(|e| e.generation == id.generation())
            .map(|e| &mut e.conn)
    }

    pub(crate) fn remove(&mut self, id: ConnId) -> Option<C> {
        if self.get(id).is_none() {
            return None;
        }
        Some(self.conns.remove(id.slot()).conn)
    }

    pub(crate) fn contains(&self, id: ConnId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.conns.len()
    }
}
