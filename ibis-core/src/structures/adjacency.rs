//! Dense-keyed adjacency index over a sized-list arena

use super::direct_index::DirectIndex;
use super::sized_list::{ListArena, ListRef};

/// Adjacency lists for a dense id space: a [`DirectIndex`] of arena
/// offsets over one contiguous [`ListArena`].
///
/// The knows graph, the interest lists and the per-query forum subgraph
/// all use this layout; side buffers indexed by arena slot (the comment
/// weights) line up with it one-to-one.
pub struct AdjacencyIndex {
    offsets: DirectIndex<u32>,
    arena: ListArena,
}

impl AdjacencyIndex {
    pub fn new(num_keys: usize) -> Self {
        AdjacencyIndex {
            offsets: DirectIndex::new(num_keys),
            arena: ListArena::new(),
        }
    }

    pub fn with_arena_capacity(num_keys: usize, arena_slots: usize) -> Self {
        AdjacencyIndex {
            offsets: DirectIndex::new(num_keys),
            arena: ListArena::with_capacity(arena_slots),
        }
    }

    /// Register the list at `offset` for `key`.
    #[inline]
    pub fn insert(&mut self, key: u32, offset: u32) {
        self.offsets.insert(key, offset);
    }

    /// The list stored for `key`, if any.
    #[inline]
    pub fn list(&self, key: u32) -> Option<ListRef<'_>> {
        self.offsets.retrieve(key).map(|off| self.arena.list(off))
    }

    /// Number of neighbours of `key` (zero when absent).
    #[inline]
    pub fn degree(&self, key: u32) -> u32 {
        self.list(key).map(|l| l.len() as u32).unwrap_or(0)
    }

    #[inline]
    pub fn arena(&self) -> &ListArena {
        &self.arena
    }

    #[inline]
    pub fn arena_mut(&mut self) -> &mut ListArena {
        &mut self.arena
    }

    /// Total arena slots; side buffers indexed by slot use this length.
    #[inline]
    pub fn arena_slots(&self) -> usize {
        self.arena.slots()
    }

    #[inline]
    pub fn max_key(&self) -> u32 {
        self.offsets.max_key()
    }
}
