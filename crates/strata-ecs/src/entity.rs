//! Entity identifiers and the sparse-set entity index.
//!
//! An [`EntityId`] is an opaque 64-bit handle. The low *entity bits* hold a
//! dense slot number and the high *version bits* hold a generation counter
//! that is bumped every time a slot is recycled, allowing immediate stale-ID
//! detection. The bit split is configured per [`EntityIndex`] (default 48/16).
//!
//! The index is a sparse set: `dense` holds every handle ever issued, with
//! the first `alive_count` entries live and the remainder parked for reuse in
//! most-recently-freed-first order; `sparse` maps a slot number back to its
//! position in `dense`. The index also tracks where each live entity is
//! stored (archetype and row) on behalf of the world.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::archetype::ArchetypeId;
use crate::EcsError;

/// Sparse entry marking a slot with no live handle.
const NONE: usize = usize::MAX;

/// Initial sparse capacity; slot numbers start at 1, so this covers 15 slots.
const INITIAL_SPARSE_LEN: usize = 16;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// An opaque generational entity handle.
///
/// The slot/version split is owned by the [`EntityIndex`] that issued the
/// handle; use [`EntityLayout::slot_of`] and [`EntityLayout::version_of`] to
/// decode one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({:#x})", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityLayout
// ---------------------------------------------------------------------------

/// The slot/version bit split used by an [`EntityIndex`].
///
/// A handle packs `[version: version_bits | slot: 64 - version_bits]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLayout {
    entity_bits: u32,
    version_bits: u32,
}

impl EntityLayout {
    /// Default version width: a 48/16 split.
    pub const DEFAULT_VERSION_BITS: u32 = 16;

    /// Build a layout with the given version width.
    ///
    /// Widths outside `1..=32` leave too few bits for one of the two fields
    /// and are rejected.
    pub fn new(version_bits: u32) -> Result<Self, EcsError> {
        if !(1..=32).contains(&version_bits) {
            return Err(EcsError::InvalidEntityLayout { version_bits });
        }
        Ok(Self {
            entity_bits: 64 - version_bits,
            version_bits,
        })
    }

    /// Number of low bits holding the slot number.
    #[inline]
    pub fn entity_bits(self) -> u32 {
        self.entity_bits
    }

    /// Number of high bits holding the version counter.
    #[inline]
    pub fn version_bits(self) -> u32 {
        self.version_bits
    }

    /// The slot number packed into `id`.
    #[inline]
    pub fn slot_of(self, id: EntityId) -> u64 {
        id.0 & self.slot_mask()
    }

    /// The version counter packed into `id`.
    #[inline]
    pub fn version_of(self, id: EntityId) -> u64 {
        id.0 >> self.entity_bits
    }

    #[inline]
    fn slot_mask(self) -> u64 {
        u64::MAX >> self.version_bits
    }

    #[inline]
    fn version_mask(self) -> u64 {
        (1u64 << self.version_bits) - 1
    }

    #[inline]
    pub(crate) fn compose(self, slot: u64, version: u64) -> EntityId {
        debug_assert!(slot <= self.slot_mask());
        debug_assert!(version <= self.version_mask());
        EntityId(version << self.entity_bits | slot)
    }

    /// Same slot, version incremented modulo `2^version_bits`. Wrap from the
    /// maximum back to zero is defined behaviour.
    #[inline]
    pub(crate) fn bump_version(self, id: EntityId) -> EntityId {
        let next = (self.version_of(id) + 1) & self.version_mask();
        self.compose(self.slot_of(id), next)
    }
}

impl Default for EntityLayout {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VERSION_BITS).expect("default version width is valid")
    }
}

// ---------------------------------------------------------------------------
// EntityLocation
// ---------------------------------------------------------------------------

/// Where a live entity is stored: which archetype and which row within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub row: usize,
}

// ---------------------------------------------------------------------------
// EntityIndex
// ---------------------------------------------------------------------------

/// Allocates and recycles [`EntityId`]s and maps each live handle to its
/// storage location.
///
/// Recycled handles are handed out in LIFO order (most recently freed first),
/// which keeps sparse churn low. Operations on dead or unknown handles are
/// silent no-ops; callers routinely poke entities that may have just died.
#[derive(Debug)]
pub struct EntityIndex {
    layout: EntityLayout,
    /// When false, recycled handles keep their freed bit pattern.
    versioning: bool,
    /// Largest slot number ever issued. Slots are numbered from 1.
    max_id: u64,
    /// Number of live handles at the front of `dense`.
    alive_count: usize,
    /// Live handles first, then recycled handles in reverse-removal order.
    dense: Vec<EntityId>,
    /// Slot number -> position in `dense`, or `NONE`. Never shrinks.
    sparse: Vec<usize>,
    /// Slot number -> storage location of the live handle occupying it.
    locations: Vec<Option<EntityLocation>>,
}

impl EntityIndex {
    /// Create an empty index.
    ///
    /// `version_bits` sets the handle bit split even when `versioning` is
    /// off; in that case the version field of every handle stays zero and a
    /// recycled handle equals the freed handle bitwise.
    pub fn new(versioning: bool, version_bits: u32) -> Result<Self, EcsError> {
        Ok(Self {
            layout: EntityLayout::new(version_bits)?,
            versioning,
            max_id: 0,
            alive_count: 0,
            dense: Vec::new(),
            sparse: vec![NONE; INITIAL_SPARSE_LEN],
            locations: vec![None; INITIAL_SPARSE_LEN],
        })
    }

    /// The handle bit split in use.
    #[inline]
    pub fn layout(&self) -> EntityLayout {
        self.layout
    }

    /// Number of currently live handles.
    #[inline]
    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Allocate a handle, preferring the most recently freed one.
    pub fn add(&mut self) -> EntityId {
        if self.alive_count < self.dense.len() {
            // A recycled handle is parked right past the live range. Its
            // version was already bumped when it was freed.
            let handle = self.dense[self.alive_count];
            self.sparse[self.layout.slot_of(handle) as usize] = self.alive_count;
            self.alive_count += 1;
            return handle;
        }

        self.max_id += 1;
        assert!(
            self.max_id <= self.layout.slot_mask(),
            "entity slot space exhausted ({} bits)",
            self.layout.entity_bits()
        );
        let handle = self.layout.compose(self.max_id, 0);
        self.dense.push(handle);
        let slot = self.max_id as usize;
        if slot >= self.sparse.len() {
            let new_len = (self.sparse.len() * 2).max(slot + 1);
            self.sparse.resize(new_len, NONE);
            self.locations.resize(new_len, None);
        }
        self.sparse[slot] = self.alive_count;
        self.alive_count += 1;
        handle
    }

    /// Free a handle. No-op when `handle` is not live (unknown slot, already
    /// freed, or stale version).
    pub fn remove(&mut self, handle: EntityId) {
        let slot = self.layout.slot_of(handle) as usize;
        if slot >= self.sparse.len() {
            return;
        }
        let row = self.sparse[slot];
        if row == NONE || row >= self.alive_count || self.dense[row] != handle {
            return;
        }

        // Swap the freed handle to the end of the live range, park it there
        // with its next version, and fix up the handle that moved into `row`.
        let last = self.alive_count - 1;
        self.dense.swap(row, last);
        let swapped = self.dense[row];
        self.sparse[self.layout.slot_of(swapped) as usize] = row;
        self.dense[last] = if self.versioning {
            self.layout.bump_version(handle)
        } else {
            handle
        };
        self.alive_count = last;
        self.sparse[slot] = NONE;
        self.locations[slot] = None;
    }

    /// Whether `handle` is currently live. The match is exact, version
    /// included.
    pub fn is_alive(&self, handle: EntityId) -> bool {
        let slot = self.layout.slot_of(handle) as usize;
        if slot >= self.sparse.len() {
            return false;
        }
        let row = self.sparse[slot];
        row != NONE && row < self.alive_count && self.dense[row] == handle
    }

    /// Storage location of a live handle, or `None` when the handle is dead
    /// or its location has not been assigned yet.
    pub fn location(&self, handle: EntityId) -> Option<EntityLocation> {
        if !self.is_alive(handle) {
            return None;
        }
        self.locations[self.layout.slot_of(handle) as usize]
    }

    /// Record where a live handle is stored. No-op on a dead handle.
    pub(crate) fn set_location(&mut self, handle: EntityId, location: EntityLocation) {
        if !self.is_alive(handle) {
            return;
        }
        self.locations[self.layout.slot_of(handle) as usize] = Some(location);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(index: &EntityIndex, id: EntityId) -> u64 {
        index.layout().slot_of(id)
    }

    fn version(index: &EntityIndex, id: EntityId) -> u64 {
        index.layout().version_of(id)
    }

    #[test]
    fn slots_issued_densely_from_one() {
        let mut index = EntityIndex::new(true, 16).unwrap();
        for expected in 1..=100u64 {
            let e = index.add();
            assert_eq!(slot(&index, e), expected);
            assert_eq!(version(&index, e), 0);
        }
        assert_eq!(index.alive_count(), 100);
    }

    #[test]
    fn recycling_is_lifo() {
        let mut index = EntityIndex::new(false, 16).unwrap();
        let e1 = index.add();
        let e2 = index.add();
        let e3 = index.add();

        index.remove(e2);
        assert_eq!(index.add(), e2);

        index.remove(e1);
        index.remove(e2);
        // e2 was freed last, so it comes back first.
        assert_eq!(index.add(), e2);
        assert_eq!(index.add(), e1);
        assert!(index.is_alive(e3));
    }

    #[test]
    fn without_versioning_recycled_handle_is_bitwise_equal() {
        let mut index = EntityIndex::new(false, 16).unwrap();
        let e = index.add();
        index.remove(e);
        let recycled = index.add();
        assert_eq!(recycled.to_raw(), e.to_raw());
    }

    #[test]
    fn versioning_bumps_on_each_recycle() {
        let mut index = EntityIndex::new(true, 16).unwrap();
        let e = index.add();
        index.remove(e);
        let e2 = index.add();
        assert_eq!(slot(&index, e2), slot(&index, e));
        assert_eq!(version(&index, e2), 1);
        assert!(!index.is_alive(e));
        assert!(index.is_alive(e2));
    }

    #[test]
    fn version_wraps_exactly_at_width() {
        let mut index = EntityIndex::new(true, 4).unwrap();
        let mut handle = index.add();
        for expected in 1..16u64 {
            index.remove(handle);
            handle = index.add();
            assert_eq!(version(&index, handle), expected);
        }
        index.remove(handle);
        handle = index.add();
        assert_eq!(version(&index, handle), 0);
        index.remove(handle);
        handle = index.add();
        assert_eq!(version(&index, handle), 1);
    }

    #[test]
    fn remove_is_noop_on_dead_handles() {
        let mut index = EntityIndex::new(true, 16).unwrap();
        let e = index.add();
        index.remove(e);
        assert_eq!(index.alive_count(), 0);
        // Double remove, stale version, never-issued slot: all ignored.
        index.remove(e);
        index.remove(EntityId::from_raw(9999));
        assert_eq!(index.alive_count(), 0);
    }

    #[test]
    fn sparse_grows_without_shrinking() {
        let mut index = EntityIndex::new(true, 16).unwrap();
        let handles: Vec<_> = (0..1000).map(|_| index.add()).collect();
        let grown = index.sparse.len();
        assert!(grown >= 1001);
        for h in &handles {
            index.remove(*h);
        }
        assert_eq!(index.sparse.len(), grown);
    }

    #[test]
    fn dense_sparse_roundtrip_holds_for_live_handles() {
        let mut index = EntityIndex::new(true, 8).unwrap();
        let mut live: Vec<EntityId> = (0..50).map(|_| index.add()).collect();
        // Free every third handle.
        let mut i = 0;
        live.retain(|h| {
            i += 1;
            if i % 3 == 0 {
                index.remove(*h);
                false
            } else {
                true
            }
        });
        for h in &live {
            assert!(index.is_alive(*h));
            let row = index.sparse[index.layout().slot_of(*h) as usize];
            assert_eq!(index.dense[row], *h);
        }
    }

    #[test]
    fn rejects_invalid_version_width() {
        assert!(EntityIndex::new(true, 0).is_err());
        assert!(EntityIndex::new(true, 33).is_err());
        assert!(EntityIndex::new(true, 32).is_ok());
    }

    #[test]
    fn location_follows_liveness() {
        let mut index = EntityIndex::new(true, 16).unwrap();
        let e = index.add();
        assert_eq!(index.location(e), None);
        let loc = EntityLocation {
            archetype: ArchetypeId(0),
            row: 3,
        };
        index.set_location(e, loc);
        assert_eq!(index.location(e), Some(loc));
        index.remove(e);
        assert_eq!(index.location(e), None);
        // The recycled handle must not inherit the old location.
        let e2 = index.add();
        assert_eq!(index.location(e2), None);
    }
}
