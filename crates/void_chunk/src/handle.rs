//! Generational handles for chunks
//!
//! Chunks reference each other (portals, overlappers, lenders) through
//! [`ChunkId`] handles into a [`ChunkArena`] owned by the chunk space. A
//! handle whose chunk has been deleted never resolves again, so a stale
//! portal or overlapper record cannot reach a dead chunk.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a chunk in a [`ChunkArena`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    index: u32,
    generation: u32,
}

impl ChunkId {
    /// Create a handle from raw parts
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Get the slot index
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Get the generation
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({}v{})", self.index, self.generation)
    }
}

/// Identifier of a geometry mapping registered with a chunk space
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingId(pub u32);

impl MappingId {
    /// Get the raw id value
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

struct Slot<T> {
    value: Option<T>,
    generation: u32,
}

/// Generational storage for chunks.
///
/// O(1) insertion, removal and lookup. Removing a value bumps the slot's
/// generation so outstanding handles stop resolving.
pub struct ChunkArena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> ChunkArena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Insert a value and get its handle
    pub fn insert(&mut self, value: T) -> ChunkId {
        self.len += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            ChunkId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                value: Some(value),
                generation: 0,
            });
            ChunkId::new(index, 0)
        }
    }

    /// Remove a value, invalidating its handle
    pub fn remove(&mut self, id: ChunkId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.value.is_none() {
            return None;
        }

        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
        self.len -= 1;
        slot.value.take()
    }

    /// Get a value by handle
    pub fn get(&self, id: ChunkId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Get a value mutably by handle
    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Check whether a handle still resolves
    pub fn contains(&self, id: ChunkId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live values with their handles
    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (ChunkId::new(i as u32, slot.generation), v))
        })
    }

    /// Collect the handles of all live values
    pub fn ids(&self) -> Vec<ChunkId> {
        self.iter().map(|(id, _)| id).collect()
    }
}

impl<T> Default for ChunkArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
