//! Entity Identifiers and the Id Allocator
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: EntityId (32-bit)                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [GGGGGGGGGGGG][IIIIIIIIIIIIIIIIIIII]                       │
//! │   └─ 12 bits ──┘└────── 20 bits ─────┘                      │
//! │      generation         index                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The index addresses component column slots; the generation is bumped
//! every time an index is freed, so stale ids referring to destroyed
//! entities fail validation instead of aliasing the new occupant.
//!
//! Allocation is fully deterministic and the allocator state travels in
//! snapshots: a participant that loads a snapshot hands out the exact ids
//! the source would have handed out next.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Bits used for the column index.
pub const ENTITY_INDEX_BITS: u32 = 20;

/// Bits used for the generation counter.
pub const ENTITY_GENERATION_BITS: u32 = 12;

/// Mask extracting the index from a raw id.
pub const ENTITY_INDEX_MASK: u32 = (1 << ENTITY_INDEX_BITS) - 1;

/// Mask for the generation counter after shifting.
pub const ENTITY_GENERATION_MASK: u32 = (1 << ENTITY_GENERATION_BITS) - 1;

/// Entity identifier: 20-bit index + 12-bit generation.
///
/// Ordering is by raw value, which is the order snapshots and the state
/// hash enumerate entities in.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EntityId(u32);

impl EntityId {
    /// Build an id from index and generation parts.
    #[inline]
    pub const fn from_parts(index: u32, generation: u32) -> Self {
        Self(((generation & ENTITY_GENERATION_MASK) << ENTITY_INDEX_BITS) | (index & ENTITY_INDEX_MASK))
    }

    /// Rebuild from a raw 32-bit value (snapshot transport).
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw 32-bit value (snapshot transport).
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Column index part.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0 & ENTITY_INDEX_MASK
    }

    /// Generation part.
    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> ENTITY_INDEX_BITS) & ENTITY_GENERATION_MASK
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}v{}", self.index(), self.generation())
    }
}

/// Serializable allocator state, exactly what the snapshot carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorState {
    /// Next fresh index if the free list is empty.
    pub next_index: u32,
    /// Recently freed indices, popped LIFO.
    pub free_list: Vec<u32>,
    /// Current generation per index (grown lazily).
    pub generations: Vec<u16>,
}

/// Deterministic entity-id allocator.
///
/// `allocate` pops the free list (LIFO) or mints a fresh index; `free`
/// bumps the generation and pushes the index. Two allocators fed the same
/// operation sequence hand out the same ids (S6 depends on this).
#[derive(Clone, Debug)]
pub struct IdAllocator {
    next_index: u32,
    free_list: Vec<u32>,
    generations: Vec<u16>,
    capacity: u32,
}

impl IdAllocator {
    /// Create an allocator with room for `capacity` simultaneous entities.
    pub fn new(capacity: u32) -> Self {
        Self {
            next_index: 0,
            free_list: Vec::new(),
            generations: Vec::new(),
            capacity,
        }
    }

    /// Allocate the next id.
    pub fn allocate(&mut self) -> EngineResult<EntityId> {
        if let Some(index) = self.free_list.pop() {
            let generation = self.generations[index as usize] as u32;
            return Ok(EntityId::from_parts(index, generation));
        }
        if self.next_index >= self.capacity {
            return Err(EngineError::Resource(format!(
                "entity-id space full ({} entities)",
                self.capacity
            )));
        }
        let index = self.next_index;
        self.next_index += 1;
        self.generations.push(0);
        Ok(EntityId::from_parts(index, 0))
    }

    /// Free an id: bump its generation and recycle the index.
    ///
    /// Fails on stale ids (generation mismatch) and never-allocated
    /// indices.
    pub fn free(&mut self, id: EntityId) -> EngineResult<()> {
        let index = id.index() as usize;
        let current = self
            .generations
            .get(index)
            .copied()
            .ok_or_else(|| EngineError::Programmer(format!("free of unallocated {:?}", id)))?;
        if current as u32 != id.generation() {
            return Err(EngineError::Programmer(format!(
                "free of stale {:?} (current generation {})",
                id, current
            )));
        }
        self.generations[index] =
            ((current as u32 + 1) & ENTITY_GENERATION_MASK) as u16;
        self.free_list.push(id.index());
        Ok(())
    }

    /// Whether an id matches the current generation of its index.
    pub fn is_current(&self, id: EntityId) -> bool {
        self.generations
            .get(id.index() as usize)
            .map(|g| *g as u32 == id.generation())
            .unwrap_or(false)
    }

    /// Capacity this allocator was built with.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Snapshot the allocator state.
    pub fn save_state(&self) -> AllocatorState {
        AllocatorState {
            next_index: self.next_index,
            free_list: self.free_list.clone(),
            generations: self.generations.clone(),
        }
    }

    /// Reinstall a snapshot state verbatim.
    pub fn load_state(&mut self, state: AllocatorState) {
        self.next_index = state.next_index;
        self.free_list = state.free_list;
        self.generations = state.generations;
    }
}

// =============================================================================
// TESTS
// =============================================================================
