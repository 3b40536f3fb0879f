//! Strata ECS -- archetype-based Entity Component System core.
//!
//! Entities are grouped by the exact set of component types they carry: each
//! unique signature gets an *archetype* holding one contiguous column per
//! data component, so iterating entities of one shape is a sequential scan
//! of packed arrays. Entity handles come from a sparse-set index with
//! optional generational versioning, and archetypes are linked by cached
//! add/remove edges for fast single-component transitions.
//!
//! Worlds are independent, single-threaded values; there is no global state.
//! Mutating a dead entity or a missing component is a deliberate no-op so
//! game-loop code can poke entities that may have just died.
//!
//! # Quick Start
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! #[derive(Debug, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! let entity = world.spawn();
//! world.insert_component(entity, Position { x: 0.0, y: 0.0 });
//! world.insert_component(entity, Velocity { dx: 1.0, dy: 0.0 });
//!
//! for (_entity, (pos, vel)) in world.query_mut::<(&mut Position, &Velocity)>() {
//!     pos.x += vel.dx;
//!     pos.y += vel.dy;
//! }
//!
//! assert_eq!(world.get_component::<Position>(entity), Some(&Position { x: 1.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod archetype;
#[allow(unsafe_code)]
pub mod component;
pub mod entity;
pub mod graph;
#[allow(unsafe_code)]
pub mod query;
#[allow(unsafe_code)]
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS configuration.
///
/// The mutation API itself reports nothing: poking a dead entity or a
/// missing component is a contractual no-op, and reads return `None`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EcsError {
    /// The requested entity-handle bit split is unusable.
    #[error("invalid entity layout: {version_bits} version bits (expected 1..=32)")]
    InvalidEntityLayout { version_bits: u32 },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId, Signature};
    pub use crate::component::{ComponentId, ComponentInfo, ComponentRegistry};
    pub use crate::entity::{EntityId, EntityIndex, EntityLayout, EntityLocation};
    pub use crate::graph::ArchetypeGraph;
    pub use crate::query::{Query, QueryItem, QueryIter, QueryIterMut};
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
