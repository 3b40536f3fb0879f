//! Archetype storage: signatures, type-erased columns, and the archetype
//! itself.
//!
//! An [`Archetype`] stores all entities that share the exact same component
//! signature. Component data is laid out in a Structure-of-Arrays pattern:
//! one [`Column`] per *data* component, each a contiguous array whose row `i`
//! belongs to the entity at position `i` of the archetype's entity vector.
//! Tags (zero-sized components) participate in the signature but own no
//! column.
//!
//! # Safety
//!
//! This module contains `unsafe` code because component data is stored as
//! type-erased, alignment-correct byte buffers. Typed reads are checked
//! against the column's recorded `TypeId` and are safe; the raw append /
//! copy / forget operations used during cross-archetype moves transfer value
//! ownership byte-wise and must follow the move protocol documented on each
//! method. The higher-level [`World`](crate::world::World) code is the only
//! caller of those.

use std::alloc::{self, Layout};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ptr;

use crate::component::{ComponentId, ComponentInfo, ComponentRegistry};
use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Identifies an archetype within one world. Indexes into the graph's
/// archetype vector; dense and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub(crate) u32);

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Separates the data and tag sections in the signature hash, so that moving
/// an id between partitions changes the hash.
const PARTITION_SEPARATOR: u8 = 0xff;

/// The identity of an archetype: its sorted data-component ids plus its
/// sorted tag ids.
///
/// Two signatures are equal exactly when both partitions match. The 64-bit
/// hash is FNV-1a over the sorted data ids, the partition separator, then
/// the sorted tag ids; it is insensitive to the order ids were supplied in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    components: Vec<ComponentId>,
    tags: Vec<ComponentId>,
}

impl Signature {
    /// Build a signature from arbitrary-order id lists.
    pub fn new(mut components: Vec<ComponentId>, mut tags: Vec<ComponentId>) -> Self {
        components.sort_unstable();
        components.dedup();
        tags.sort_unstable();
        tags.dedup();
        Self { components, tags }
    }

    /// The empty signature (entities with no components).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sorted data-component ids.
    #[inline]
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    /// Sorted tag ids.
    #[inline]
    pub fn tags(&self) -> &[ComponentId] {
        &self.tags
    }

    /// Whether `id` appears in either partition.
    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.contains_component(id) || self.contains_tag(id)
    }

    /// Whether `id` appears in the data partition.
    #[inline]
    pub fn contains_component(&self, id: ComponentId) -> bool {
        self.components.binary_search(&id).is_ok()
    }

    /// Whether `id` appears in the tag partition.
    #[inline]
    pub fn contains_tag(&self, id: ComponentId) -> bool {
        self.tags.binary_search(&id).is_ok()
    }

    /// A deep copy of this signature with `id` added to the partition chosen
    /// by `tag`. Both id vectors are cloned; no state is shared with `self`.
    pub fn with(&self, id: ComponentId, tag: bool) -> Self {
        let mut next = self.clone();
        let list = if tag {
            &mut next.tags
        } else {
            &mut next.components
        };
        if let Err(pos) = list.binary_search(&id) {
            list.insert(pos, id);
        }
        next
    }

    /// A deep copy of this signature with `id` removed from whichever
    /// partition holds it.
    pub fn without(&self, id: ComponentId) -> Self {
        let mut next = self.clone();
        if let Ok(pos) = next.components.binary_search(&id) {
            next.components.remove(pos);
        } else if let Ok(pos) = next.tags.binary_search(&id) {
            next.tags.remove(pos);
        }
        next
    }

    /// FNV-1a hash of the signature. Reproducible from the id sets alone.
    pub fn hash(&self) -> u64 {
        let mut h = FNV_OFFSET;
        let mut step = |byte: u8| {
            h ^= byte as u64;
            h = h.wrapping_mul(FNV_PRIME);
        };
        for id in &self.components {
            for byte in id.0.to_le_bytes() {
                step(byte);
            }
        }
        step(PARTITION_SEPARATOR);
        for id in &self.tags {
            for byte in id.0.to_le_bytes() {
                step(byte);
            }
        }
        h
    }
}

// ---------------------------------------------------------------------------
// Column -- type-erased component storage
// ---------------------------------------------------------------------------

/// A type-erased, densely packed array of component values of a single type.
///
/// Internally a manually managed buffer whose layout matches the stored
/// component type. Columns never hold zero-sized types; tags have no column.
pub(crate) struct Column {
    /// Pointer to the heap allocation (null while capacity == 0).
    data: *mut u8,
    /// Number of live elements.
    len: usize,
    /// Number of elements the current allocation fits.
    capacity: usize,
    item_size: usize,
    item_align: usize,
    /// Concrete element type, for checked typed access.
    type_id: TypeId,
    /// Drop glue for one element, when the type needs it.
    drop_fn: Option<unsafe fn(*mut u8)>,
}

// Only registered component types end up in columns, and registration
// requires Send + Sync.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Create a new, empty column for the data component described by `info`.
    fn new(info: &ComponentInfo) -> Self {
        assert!(info.size > 0, "tags have no column storage");
        Self {
            data: ptr::null_mut(),
            len: 0,
            capacity: 0,
            item_size: info.size,
            item_align: info.align,
            type_id: info.type_id,
            drop_fn: info.drop_fn,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn layout_for_capacity(&self, cap: usize) -> Layout {
        Layout::from_size_align(self.item_size * cap, self.item_align)
            .expect("column layout overflow")
    }

    fn grow_if_needed(&mut self) {
        if self.len < self.capacity {
            return;
        }
        let new_cap = if self.capacity == 0 {
            4
        } else {
            self.capacity * 2
        };
        let new_layout = self.layout_for_capacity(new_cap);
        unsafe {
            let new_data = if self.capacity == 0 {
                alloc::alloc(new_layout)
            } else {
                let old_layout = self.layout_for_capacity(self.capacity);
                alloc::realloc(self.data, old_layout, new_layout.size())
            };
            assert!(!new_data.is_null(), "column allocation failed");
            self.data = new_data;
        }
        self.capacity = new_cap;
    }

    #[inline]
    fn ptr_at(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len);
        unsafe { self.data.add(index * self.item_size) }
    }

    /// Append a value by copying `item_size` bytes from `value_ptr`.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to a valid, initialised value of the column's
    /// element type. Ownership moves into the column; the caller must not
    /// drop the source.
    unsafe fn push_raw(&mut self, value_ptr: *const u8) {
        self.grow_if_needed();
        let dst = self.data.add(self.len * self.item_size);
        ptr::copy_nonoverlapping(value_ptr, dst, self.item_size);
        self.len += 1;
    }

    /// Append a copy of `src`'s row. The bytes now exist in both columns.
    ///
    /// # Safety
    ///
    /// `src` must store the same element type and `row` must be in bounds.
    /// The caller must retire the source row with
    /// [`swap_remove_forget`](Self::swap_remove_forget) (never with a
    /// dropping removal) so exactly one copy owns the value.
    unsafe fn push_copy_from(&mut self, src: &Column, row: usize) {
        debug_assert_eq!(self.type_id, src.type_id);
        debug_assert_eq!(self.item_size, src.item_size);
        self.push_raw(src.ptr_at(row));
    }

    /// Remove row `row` by moving the last row into its place, without
    /// running drop glue on the removed bytes.
    ///
    /// # Safety
    ///
    /// `row` must be in bounds, and the value at `row` must already have
    /// been moved out or dropped in place.
    unsafe fn swap_remove_forget(&mut self, row: usize) {
        debug_assert!(row < self.len);
        let last = self.len - 1;
        if row != last {
            ptr::copy_nonoverlapping(self.ptr_at(last), self.ptr_at(row), self.item_size);
        }
        self.len -= 1;
    }

    /// Run drop glue on the value at `row`, leaving its bytes logically dead.
    ///
    /// # Safety
    ///
    /// `row` must be in bounds and hold a live value; the caller must retire
    /// the row with [`swap_remove_forget`](Self::swap_remove_forget) before
    /// any further access.
    unsafe fn drop_cell(&mut self, row: usize) {
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(self.ptr_at(row));
        }
    }

    /// Checked typed reference to the value at `row`.
    fn get_ref<T: 'static>(&self, row: usize) -> Option<&T> {
        if self.type_id != TypeId::of::<T>() || row >= self.len {
            return None;
        }
        unsafe { Some(&*(self.ptr_at(row) as *const T)) }
    }

    /// Checked typed mutable reference to the value at `row`.
    fn get_mut<T: 'static>(&mut self, row: usize) -> Option<&mut T> {
        if self.type_id != TypeId::of::<T>() || row >= self.len {
            return None;
        }
        unsafe { Some(&mut *(self.ptr_at(row) as *mut T)) }
    }

    /// Checked view of the whole column as a typed slice.
    fn as_slice<T: 'static>(&self) -> Option<&[T]> {
        if self.type_id != TypeId::of::<T>() {
            return None;
        }
        if self.len == 0 {
            return Some(&[]);
        }
        unsafe { Some(std::slice::from_raw_parts(self.data as *const T, self.len)) }
    }

    /// Checked mutable view of the whole column as a typed slice.
    fn as_mut_slice<T: 'static>(&mut self) -> Option<&mut [T]> {
        if self.type_id != TypeId::of::<T>() {
            return None;
        }
        if self.len == 0 {
            return Some(&mut []);
        }
        unsafe {
            Some(std::slice::from_raw_parts_mut(
                self.data as *mut T,
                self.len,
            ))
        }
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        unsafe {
            if let Some(drop_fn) = self.drop_fn {
                for i in 0..self.len {
                    drop_fn(self.data.add(i * self.item_size));
                }
            }
            if self.capacity > 0 {
                alloc::dealloc(self.data, self.layout_for_capacity(self.capacity));
            }
        }
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("item_size", &self.item_size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// Stores all entities sharing one exact component signature.
///
/// Columns are kept sorted by [`ComponentId`] for deterministic order and
/// binary-search lookup. Every column has the same length as the entity
/// vector after each completed world operation.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    /// FNV-1a hash of the signature; the archetype's stable identity.
    hash: u64,
    signature: Signature,
    /// One column per data component, sorted by `ComponentId`.
    columns: Vec<(ComponentId, Column)>,
    /// Parallel entity vector; row `i` of every column belongs to
    /// `entities[i]`.
    entities: Vec<EntityId>,
    /// Components currently disabled for this archetype. Data stays stored;
    /// enable-state-honouring queries skip the archetype.
    disabled: HashSet<ComponentId>,
    /// Cached destination for adding one component.
    add_edges: HashMap<ComponentId, ArchetypeId>,
    /// Cached destination for removing one component.
    remove_edges: HashMap<ComponentId, ArchetypeId>,
}

impl Archetype {
    /// Create an empty archetype for `signature`, with one column per data
    /// component. Every id in the signature must already be registered.
    pub(crate) fn new(id: ArchetypeId, signature: Signature, registry: &ComponentRegistry) -> Self {
        let columns = signature
            .components()
            .iter()
            .map(|&component| {
                let info = registry
                    .info(component)
                    .expect("archetype signature references an unregistered component");
                (component, Column::new(info))
            })
            .collect();
        Self {
            id,
            hash: signature.hash(),
            signature,
            columns,
            entities: Vec::new(),
            disabled: HashSet::new(),
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        }
    }

    /// The archetype's dense id within its world.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The 64-bit signature hash identifying this archetype.
    #[inline]
    pub fn signature_hash(&self) -> u64 {
        self.hash
    }

    /// The signature defining this archetype.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of entities stored here.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the archetype holds no entities.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The resident entities, in row order.
    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Whether the signature contains `component` (data or tag).
    #[inline]
    pub fn contains(&self, component: ComponentId) -> bool {
        self.signature.contains(component)
    }

    /// Whether `component` is currently enabled on this archetype.
    #[inline]
    pub fn is_enabled(&self, component: ComponentId) -> bool {
        !self.disabled.contains(&component)
    }

    pub(crate) fn set_enabled(&mut self, component: ComponentId, enabled: bool) {
        if enabled {
            self.disabled.remove(&component);
        } else {
            self.disabled.insert(component);
        }
    }

    #[inline]
    fn column_index(&self, component: ComponentId) -> Option<usize> {
        self.columns
            .binary_search_by_key(&component, |(id, _)| *id)
            .ok()
    }

    fn column(&self, component: ComponentId) -> Option<&Column> {
        let index = self.column_index(component)?;
        Some(&self.columns[index].1)
    }

    fn column_mut(&mut self, component: ComponentId) -> Option<&mut Column> {
        let index = self.column_index(component)?;
        Some(&mut self.columns[index].1)
    }

    // -- typed access --------------------------------------------------------

    /// Checked reference to the `T` value of row `row`.
    pub fn get_ref<T: 'static>(&self, component: ComponentId, row: usize) -> Option<&T> {
        self.column(component)?.get_ref::<T>(row)
    }

    /// Checked mutable reference to the `T` value of row `row`.
    pub fn get_mut<T: 'static>(&mut self, component: ComponentId, row: usize) -> Option<&mut T> {
        self.column_mut(component)?.get_mut::<T>(row)
    }

    /// Contiguous typed view of the column storing `T` values, one per
    /// resident entity. `None` when no column stores `T`.
    ///
    /// The slice is invalidated by any subsequent mutation of the world.
    pub fn column_slice<T: 'static>(&self) -> Option<&[T]> {
        let type_id = TypeId::of::<T>();
        self.columns
            .iter()
            .find(|(_, column)| column.type_id == type_id)
            .and_then(|(_, column)| column.as_slice::<T>())
    }

    /// Mutable variant of [`column_slice`](Self::column_slice).
    pub fn column_slice_mut<T: 'static>(&mut self) -> Option<&mut [T]> {
        let type_id = TypeId::of::<T>();
        self.columns
            .iter_mut()
            .find(|(_, column)| column.type_id == type_id)
            .and_then(|(_, column)| column.as_mut_slice::<T>())
    }

    // -- row lifecycle (the move protocol) -----------------------------------
    //
    // A cross-archetype move appends to the destination first, then retires
    // the source row, so the entity never transiently vanishes and the
    // swapped-last entity always has a distinct row to land in:
    //
    //   1. destination.push_entity(e)
    //   2. destination.copy_row_from(source, src_row)   (shared columns)
    //   3. destination.push_value(c, value)             (the added value)
    //   4. source.drop_cell(c, src_row)                 (the removed value)
    //   5. source.swap_remove_row_forget(src_row)

    /// Append `entity` to the entity vector, returning its row. Columns are
    /// appended separately; the archetype is length-inconsistent until each
    /// column has received exactly one value for this row.
    pub(crate) fn push_entity(&mut self, entity: EntityId) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        row
    }

    /// Append a typed value to the column for `component`.
    ///
    /// # Panics
    ///
    /// Panics when the archetype has no column for `component` or the column
    /// stores a different type; both indicate a bug in the caller.
    pub(crate) fn push_value<T: 'static>(&mut self, component: ComponentId, value: T) {
        let column = self
            .column_mut(component)
            .expect("push_value: no column for component");
        assert_eq!(
            column.type_id,
            TypeId::of::<T>(),
            "push_value: column type mismatch"
        );
        unsafe {
            column.push_raw(&value as *const T as *const u8);
        }
        std::mem::forget(value);
    }

    /// Append, to every column shared with `src`, a copy of `src`'s row
    /// `src_row`.
    ///
    /// # Safety
    ///
    /// The caller must retire `src_row` with
    /// [`swap_remove_row_forget`](Self::swap_remove_row_forget) so that each
    /// copied value keeps exactly one owner.
    pub(crate) unsafe fn copy_row_from(&mut self, src: &Archetype, src_row: usize) {
        for (component, column) in &mut self.columns {
            if let Some(src_column) = src.column(*component) {
                column.push_copy_from(src_column, src_row);
            }
        }
    }

    /// Run drop glue on the value of `component` at `row`, if that column
    /// exists. Tags have no column and no stored value to drop.
    ///
    /// # Safety
    ///
    /// The row must hold a live value and must be retired with
    /// [`swap_remove_row_forget`](Self::swap_remove_row_forget) before any
    /// further access.
    pub(crate) unsafe fn drop_cell(&mut self, component: ComponentId, row: usize) {
        if let Some(column) = self.column_mut(component) {
            column.drop_cell(row);
        }
    }

    /// Run drop glue on every cell of `row`, ahead of discarding the row.
    ///
    /// # Safety
    ///
    /// As for [`drop_cell`](Self::drop_cell).
    pub(crate) unsafe fn drop_row(&mut self, row: usize) {
        for (_, column) in &mut self.columns {
            column.drop_cell(row);
        }
    }

    /// Swap-remove `row` from the entity vector and every column without
    /// running drop glue. Returns the entity that was relocated into `row`,
    /// if the removed row was not the last; the caller must repair that
    /// entity's index entry.
    ///
    /// # Safety
    ///
    /// Every cell of `row` must already have been moved out (via
    /// [`copy_row_from`](Self::copy_row_from)) or dropped in place.
    pub(crate) unsafe fn swap_remove_row_forget(&mut self, row: usize) -> Option<EntityId> {
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row);
        for (_, column) in &mut self.columns {
            column.swap_remove_forget(row);
        }
        if row < last {
            Some(self.entities[row])
        } else {
            None
        }
    }

    // -- edges ---------------------------------------------------------------

    pub(crate) fn add_edge(&self, component: ComponentId) -> Option<ArchetypeId> {
        self.add_edges.get(&component).copied()
    }

    pub(crate) fn set_add_edge(&mut self, component: ComponentId, to: ArchetypeId) {
        self.add_edges.insert(component, to);
    }

    pub(crate) fn remove_edge(&self, component: ComponentId) -> Option<ArchetypeId> {
        self.remove_edges.get(&component).copied()
    }

    pub(crate) fn set_remove_edge(&mut self, component: ComponentId, to: ArchetypeId) {
        self.remove_edges.insert(component, to);
    }

    // -- invariants ----------------------------------------------------------

    /// Verify the archetype's local invariants, panicking on violation.
    pub(crate) fn check_invariants(&self) {
        for (component, column) in &self.columns {
            assert_eq!(
                column.len(),
                self.entities.len(),
                "column {component:?} out of lockstep with entity vector"
            );
        }
        assert!(
            self.signature.components().windows(2).all(|w| w[0] < w[1]),
            "signature data ids not sorted"
        );
        assert!(
            self.signature.tags().windows(2).all(|w| w[0] < w[1]),
            "signature tag ids not sorted"
        );
        assert_eq!(
            self.hash,
            self.signature.hash(),
            "signature hash not reproducible"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
