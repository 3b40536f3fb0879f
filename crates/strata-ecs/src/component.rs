//! Component type registration and metadata.
//!
//! Every component type used in the ECS is registered at runtime in a
//! [`ComponentRegistry`]. Registration produces a [`ComponentId`] that keys
//! archetype signatures, column lookups, and query matching. A zero-sized
//! type registers as a *tag*: it participates in archetype identity but owns
//! no column storage.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in
// lib.rs, for the type-erased drop shim captured at registration time.

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Opaque 64-bit identifier for a registered component type.
///
/// Ids are allocated sequentially per world; they are stable for the world's
/// lifetime but not across worlds or runs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub(crate) u64);

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Unique ID assigned at registration time.
    pub id: ComponentId,
    /// `std::any::type_name` of the registered type, for diagnostics.
    pub type_name: &'static str,
    /// `std::mem::size_of::<T>()`. Zero marks a tag.
    pub size: usize,
    /// `std::mem::align_of::<T>()`.
    pub align: usize,
    /// Rust `TypeId` for runtime type checking.
    pub type_id: TypeId,
    /// Drops one value in place. `None` when the type has no drop glue.
    pub(crate) drop_fn: Option<unsafe fn(*mut u8)>,
}

impl ComponentInfo {
    /// Whether this component is a tag (zero-sized, no column storage).
    #[inline]
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping Rust types to [`ComponentId`]s and their metadata.
///
/// Registration is idempotent: registering the same Rust type twice returns
/// the same id and identical metadata.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    /// TypeId -> ComponentId for dedup.
    by_type: HashMap<TypeId, ComponentId>,
    /// Indexed by `ComponentId.0`.
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type, returning its id.
    pub fn register<T: Send + Sync + 'static>(&mut self) -> ComponentId {
        let rust_type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_type_id) {
            return existing;
        }

        unsafe fn drop_shim<T>(ptr: *mut u8) {
            std::ptr::drop_in_place(ptr as *mut T);
        }

        let id = ComponentId(self.infos.len() as u64);
        self.infos.push(ComponentInfo {
            id,
            type_name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id: rust_type_id,
            drop_fn: std::mem::needs_drop::<T>().then_some(drop_shim::<T> as unsafe fn(*mut u8)),
        });
        self.by_type.insert(rust_type_id, id);
        id
    }

    /// Look up a component id by its Rust type, without registering.
    pub fn id_of<T: 'static>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Metadata for a registered component id.
    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.0 as usize)
    }

    /// Value size in bytes for a registered id; zero marks a tag.
    pub fn size_of(&self, id: ComponentId) -> Option<usize> {
        self.info(id).map(|info| info.size)
    }

    /// Total number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether any component types have been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
