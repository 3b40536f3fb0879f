//! The [`World`] is the top-level container for the ECS. It owns the entity
//! index, the component registry, and the archetype graph, and orchestrates
//! the operations that move entities between archetypes.
//!
//! # Mutation contract
//!
//! Mutating operations on a dead handle or a missing component are silent
//! no-ops (logged at debug level): game-loop code routinely pokes entities
//! that may have just died. Reads return `None` instead. Internal invariant
//! violations are bugs and panic.
//!
//! # Move ordering
//!
//! Every cross-archetype move appends to the destination archetype *before*
//! swap-removing the source row. The entity never transiently leaves the
//! world, and the entity swapped into the vacated row always has a distinct
//! row to be re-pointed at.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in
// lib.rs; the unsafe blocks drive the archetype move protocol.

use tracing::debug;

use crate::archetype::{Archetype, ArchetypeId, Signature};
use crate::component::{ComponentId, ComponentRegistry};
use crate::entity::{EntityId, EntityIndex, EntityLayout, EntityLocation};
use crate::graph::ArchetypeGraph;
use crate::EcsError;

/// The top-level ECS container. Worlds are independent values; there is no
/// process-wide state.
///
/// A world is single-threaded: every operation takes the world exclusively
/// and runs to completion. References obtained from reads or queries are
/// invalidated by the next mutating call, which the borrow checker enforces.
#[derive(Debug)]
pub struct World {
    entities: EntityIndex,
    registry: ComponentRegistry,
    graph: ArchetypeGraph,
    /// The interned empty archetype; home of freshly spawned entities.
    empty: ArchetypeId,
}

impl World {
    /// Create a world with the default entity layout: versioned handles with
    /// a 48/16 slot/version split.
    pub fn new() -> Self {
        Self::with_entity_layout(true, EntityLayout::DEFAULT_VERSION_BITS)
            .expect("default entity layout is valid")
    }

    /// Create a world with an explicit handle layout.
    ///
    /// With `versioning` off, recycled handles are bitwise identical to the
    /// freed ones. `version_bits` must lie in `1..=32`.
    pub fn with_entity_layout(versioning: bool, version_bits: u32) -> Result<Self, EcsError> {
        let entities = EntityIndex::new(versioning, version_bits)?;
        let registry = ComponentRegistry::new();
        let mut graph = ArchetypeGraph::new();
        let empty = graph.intern(Signature::empty(), &registry);
        Ok(Self {
            entities,
            registry,
            graph,
            empty,
        })
    }

    /// Read-only access to the component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Register a component type. Idempotent; also invoked implicitly by
    /// [`insert_component`](Self::insert_component).
    pub fn register_component<T: Send + Sync + 'static>(&mut self) -> ComponentId {
        self.registry.register::<T>()
    }

    /// The id a component type was registered under, if any.
    pub fn component_id<T: 'static>(&self) -> Option<ComponentId> {
        self.registry.id_of::<T>()
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Spawn a new, component-less entity into the empty archetype.
    pub fn spawn(&mut self) -> EntityId {
        let entity = self.entities.add();
        let row = self.graph.get_mut(self.empty).push_entity(entity);
        self.entities.set_location(
            entity,
            EntityLocation {
                archetype: self.empty,
                row,
            },
        );
        entity
    }

    /// Despawn an entity, dropping its component values and recycling its
    /// handle. Returns `false` (and does nothing) when `entity` is not alive.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        let Some(location) = self.entities.location(entity) else {
            debug!(?entity, "despawn on dead entity ignored");
            return false;
        };
        let archetype = self.graph.get_mut(location.archetype);
        // Safety: the row holds live values; it is retired immediately after
        // its cells are dropped in place.
        let moved = unsafe {
            archetype.drop_row(location.row);
            archetype.swap_remove_row_forget(location.row)
        };
        if let Some(moved_entity) = moved {
            self.entities.set_location(
                moved_entity,
                EntityLocation {
                    archetype: location.archetype,
                    row: location.row,
                },
            );
        }
        self.entities.remove(entity);
        true
    }

    /// Whether `entity` is currently alive. The check is exact: a stale
    /// handle to a recycled slot is dead.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of currently alive entities.
    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    // -- component mutation -------------------------------------------------

    /// Insert a component on an entity, registering `T` on first use.
    ///
    /// If the entity already carries the component, the value is overwritten
    /// in place (for a tag there is nothing to write and the call is a
    /// no-op). Otherwise the entity moves to the archetype reached by the
    /// add edge, carrying its other component values along. No-op on a dead
    /// handle.
    ///
    /// Tag values (`size_of::<T>() == 0`) carry no data; the value itself is
    /// discarded.
    pub fn insert_component<T: Send + Sync + 'static>(&mut self, entity: EntityId, value: T) {
        let component = self.registry.register::<T>();
        let Some(location) = self.entities.location(entity) else {
            debug!(?entity, component = %std::any::type_name::<T>(), "insert on dead entity ignored");
            return;
        };
        let is_tag = std::mem::size_of::<T>() == 0;

        if self.graph.get(location.archetype).contains(component) {
            if !is_tag {
                let archetype = self.graph.get_mut(location.archetype);
                let slot = archetype
                    .get_mut::<T>(component, location.row)
                    .expect("live entity lost its component column");
                *slot = value;
            }
            return;
        }

        let destination = self
            .graph
            .add_target(location.archetype, component, &self.registry);
        debug_assert_ne!(destination, location.archetype);
        let (source, target) = self.graph.pair_mut(location.archetype, destination);

        // Append to the destination first: entity row, carried-over column
        // values, then the new value.
        let new_row = target.push_entity(entity);
        // Safety: the copied source row is retired right below, so each
        // carried value keeps a single owner.
        let moved = unsafe {
            target.copy_row_from(source, location.row);
            if !is_tag {
                target.push_value(component, value);
            }
            source.swap_remove_row_forget(location.row)
        };

        if let Some(moved_entity) = moved {
            self.entities.set_location(
                moved_entity,
                EntityLocation {
                    archetype: location.archetype,
                    row: location.row,
                },
            );
        }
        self.entities.set_location(
            entity,
            EntityLocation {
                archetype: destination,
                row: new_row,
            },
        );
    }

    /// Remove a component from an entity, moving it to the archetype reached
    /// by the remove edge. No-op on a dead handle, an unregistered type, or
    /// an entity that does not carry the component.
    pub fn remove_component<T: 'static>(&mut self, entity: EntityId) {
        let Some(component) = self.registry.id_of::<T>() else {
            debug!(component = %std::any::type_name::<T>(), "remove of unregistered component ignored");
            return;
        };
        let Some(location) = self.entities.location(entity) else {
            debug!(?entity, "remove on dead entity ignored");
            return;
        };
        if !self.graph.get(location.archetype).contains(component) {
            debug!(?entity, ?component, "remove of missing component ignored");
            return;
        }

        let destination = self
            .graph
            .remove_target(location.archetype, component, &self.registry);
        debug_assert_ne!(destination, location.archetype);
        let (source, target) = self.graph.pair_mut(location.archetype, destination);

        let new_row = target.push_entity(entity);
        // Safety: shared values are copied out, the removed value is dropped
        // in place, then the source row is retired; no cell is read or
        // dropped twice.
        let moved = unsafe {
            target.copy_row_from(source, location.row);
            source.drop_cell(component, location.row);
            source.swap_remove_row_forget(location.row)
        };

        if let Some(moved_entity) = moved {
            self.entities.set_location(
                moved_entity,
                EntityLocation {
                    archetype: location.archetype,
                    row: location.row,
                },
            );
        }
        self.entities.set_location(
            entity,
            EntityLocation {
                archetype: destination,
                row: new_row,
            },
        );
    }

    // -- component access ---------------------------------------------------

    /// Whether the entity carries the component (data or tag).
    pub fn has_component<T: 'static>(&self, entity: EntityId) -> bool {
        let Some(component) = self.registry.id_of::<T>() else {
            return false;
        };
        self.entities
            .location(entity)
            .is_some_and(|location| self.graph.get(location.archetype).contains(component))
    }

    /// Reference to the entity's `T` value. `None` when the entity is dead,
    /// the type is unregistered, or no column stores `T` (tags included).
    pub fn get_component<T: 'static>(&self, entity: EntityId) -> Option<&T> {
        let component = self.registry.id_of::<T>()?;
        let location = self.entities.location(entity)?;
        self.graph
            .get(location.archetype)
            .get_ref::<T>(component, location.row)
    }

    /// Mutable variant of [`get_component`](Self::get_component).
    pub fn get_component_mut<T: 'static>(&mut self, entity: EntityId) -> Option<&mut T> {
        let component = self.registry.id_of::<T>()?;
        let location = self.entities.location(entity)?;
        self.graph
            .get_mut(location.archetype)
            .get_mut::<T>(component, location.row)
    }

    // -- enable / disable ---------------------------------------------------

    /// Disable `T` on the entity's archetype. The data stays in storage and
    /// the entity does not move; enable-state-honouring queries skip the
    /// archetype. No-op when the entity is dead or lacks the component.
    pub fn disable_component<T: 'static>(&mut self, entity: EntityId) {
        self.set_component_enabled::<T>(entity, false);
    }

    /// Undo [`disable_component`](Self::disable_component).
    pub fn enable_component<T: 'static>(&mut self, entity: EntityId) {
        self.set_component_enabled::<T>(entity, true);
    }

    /// Whether `T` is present and enabled for the entity's archetype.
    pub fn is_component_enabled<T: 'static>(&self, entity: EntityId) -> bool {
        let Some(component) = self.registry.id_of::<T>() else {
            return false;
        };
        let Some(location) = self.entities.location(entity) else {
            return false;
        };
        let archetype = self.graph.get(location.archetype);
        archetype.contains(component) && archetype.is_enabled(component)
    }

    fn set_component_enabled<T: 'static>(&mut self, entity: EntityId, enabled: bool) {
        let Some(component) = self.registry.id_of::<T>() else {
            debug!(component = %std::any::type_name::<T>(), "enable-state change for unregistered component ignored");
            return;
        };
        let Some(location) = self.entities.location(entity) else {
            debug!(?entity, "enable-state change on dead entity ignored");
            return;
        };
        let archetype = self.graph.get_mut(location.archetype);
        if !archetype.contains(component) {
            debug!(?entity, ?component, "enable-state change for missing component ignored");
            return;
        }
        archetype.set_enabled(component, enabled);
    }

    // -- queries ------------------------------------------------------------

    /// All archetypes whose data signature contains every requested
    /// component, each yielded once, in creation order.
    pub fn archetypes_with(&self, components: &[ComponentId]) -> impl Iterator<Item = &Archetype> {
        self.graph.archetypes_with(components)
    }

    /// The archetype an entity currently lives in.
    pub fn archetype_of(&self, entity: EntityId) -> Option<&Archetype> {
        let location = self.entities.location(entity)?;
        Some(self.graph.get(location.archetype))
    }

    /// Contiguous table of `T` values for one archetype, one row per
    /// resident entity. `None` when the archetype has no column of `T`.
    pub fn table<T: 'static>(&self, archetype: ArchetypeId) -> Option<&[T]> {
        self.graph.get(archetype).column_slice::<T>()
    }

    /// Mutable variant of [`table`](Self::table). The slice is invalidated
    /// by the next mutating call on the world.
    pub fn table_mut<T: 'static>(&mut self, archetype: ArchetypeId) -> Option<&mut [T]> {
        self.graph.get_mut(archetype).column_slice_mut::<T>()
    }

    /// Number of archetypes interned so far (the empty archetype included).
    pub fn archetype_count(&self) -> usize {
        self.graph.len()
    }

    /// Read-only access to the archetype graph, for walking archetypes and
    /// their signatures directly.
    pub fn archetype_graph(&self) -> &ArchetypeGraph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut ArchetypeGraph {
        &mut self.graph
    }

    // -- diagnostics --------------------------------------------------------

    /// Walk every archetype and verify the structural invariants: every
    /// column in lockstep with its entity vector, sorted reproducible
    /// signatures, and the entity index agreeing with archetype residency.
    ///
    /// Panics on the first violation; a violation is a bug in this crate.
    pub fn check_integrity(&self) {
        let mut resident = 0usize;
        for archetype in self.graph.archetypes() {
            archetype.check_invariants();
            resident += archetype.len();
            for (row, &entity) in archetype.entities().iter().enumerate() {
                let location = self
                    .entities
                    .location(entity)
                    .unwrap_or_else(|| panic!("resident entity {entity:?} missing from index"));
                assert_eq!(
                    (location.archetype, location.row),
                    (archetype.id(), row),
                    "index location disagrees with archetype residency for {entity:?}"
                );
            }
        }
        assert_eq!(
            resident,
            self.entities.alive_count(),
            "resident entity total disagrees with alive count"
        );
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Name(String);

    struct Frozen;

    #[test]
    fn spawn_places_entity_in_empty_archetype() {
        let mut world = World::new();
        let e = world.spawn();
        assert!(world.is_alive(e));
        assert_eq!(world.entity_count(), 1);
        assert!(world.archetype_of(e).unwrap().signature().components().is_empty());
        world.check_integrity();
    }

    #[test]
    fn insert_then_get_roundtrip() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Pos { x: 10.0, y: 20.0 });
        assert_eq!(
            world.get_component::<Pos>(e),
            Some(&Pos { x: 10.0, y: 20.0 })
        );
        world.check_integrity();
    }

    #[test]
    fn second_insert_overwrites_in_place() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Pos { x: 1.0, y: 1.0 });
        let archetypes_before = world.archetype_count();
        world.insert_component(e, Pos { x: 9.0, y: 9.0 });
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 9.0, y: 9.0 }));
        // Overwrite does not move the entity or mint a new archetype.
        assert_eq!(world.archetype_count(), archetypes_before);
    }

    #[test]
    fn migration_preserves_existing_data() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Pos { x: 10.0, y: 20.0 });
        world.insert_component(e, Vel { dx: 5.0, dy: 5.0 });
        assert_eq!(world.get_component::<Pos>(e).unwrap().x, 10.0);

        world.remove_component::<Vel>(e);
        assert!(!world.has_component::<Vel>(e));
        assert_eq!(world.get_component::<Pos>(e).unwrap().x, 10.0);
        world.check_integrity();
    }

    #[test]
    fn remove_drops_only_the_removed_value() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Name("keep-me".to_owned()));
        world.insert_component(e, Pos { x: 0.0, y: 0.0 });
        world.remove_component::<Pos>(e);
        assert_eq!(
            world.get_component::<Name>(e),
            Some(&Name("keep-me".to_owned()))
        );
    }

    #[test]
    fn swap_remove_repairs_moved_entity_location() {
        let mut world = World::new();
        let e1 = world.spawn();
        let e2 = world.spawn();
        let e3 = world.spawn();
        for (i, &e) in [e1, e2, e3].iter().enumerate() {
            world.insert_component(
                e,
                Pos {
                    x: i as f32,
                    y: 0.0,
                },
            );
        }

        world.despawn(e2);
        // e3 was relocated into e2's row; its data must follow it.
        assert_eq!(world.get_component::<Pos>(e3), Some(&Pos { x: 2.0, y: 0.0 }));
        assert_eq!(world.get_component::<Pos>(e1), Some(&Pos { x: 0.0, y: 0.0 }));
        world.check_integrity();
    }

    #[test]
    fn mutations_on_dead_entities_are_noops() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Pos { x: 1.0, y: 1.0 });
        assert!(world.despawn(e));

        assert!(!world.despawn(e));
        world.insert_component(e, Pos { x: 2.0, y: 2.0 });
        world.remove_component::<Pos>(e);
        world.disable_component::<Pos>(e);
        assert_eq!(world.get_component::<Pos>(e), None);
        assert!(!world.has_component::<Pos>(e));
        assert_eq!(world.entity_count(), 0);
        world.check_integrity();
    }

    #[test]
    fn removing_a_missing_component_is_a_noop() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Pos { x: 1.0, y: 1.0 });
        world.remove_component::<Vel>(e);
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 1.0 }));
        world.check_integrity();
    }

    #[test]
    fn tags_join_the_signature_without_storage() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Pos { x: 1.0, y: 2.0 });
        world.insert_component(e, Frozen);

        assert!(world.has_component::<Frozen>(e));
        // Tags have no column to read from.
        assert!(world.get_component::<Frozen>(e).is_none());
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));

        world.remove_component::<Frozen>(e);
        assert!(!world.has_component::<Frozen>(e));
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
        world.check_integrity();
    }

    #[test]
    fn insertion_order_does_not_split_archetypes() {
        let mut world = World::new();
        let e1 = world.spawn();
        world.insert_component(e1, Pos { x: 0.0, y: 0.0 });
        world.insert_component(e1, Vel { dx: 0.0, dy: 0.0 });
        world.insert_component(e1, Name("a".to_owned()));

        let e2 = world.spawn();
        world.insert_component(e2, Vel { dx: 0.0, dy: 0.0 });
        world.insert_component(e2, Name("b".to_owned()));
        world.insert_component(e2, Pos { x: 0.0, y: 0.0 });

        let e3 = world.spawn();
        world.insert_component(e3, Name("c".to_owned()));
        world.insert_component(e3, Pos { x: 0.0, y: 0.0 });
        world.insert_component(e3, Vel { dx: 0.0, dy: 0.0 });

        let a1 = world.archetype_of(e1).unwrap().id();
        assert_eq!(world.archetype_of(e2).unwrap().id(), a1);
        assert_eq!(world.archetype_of(e3).unwrap().id(), a1);
        world.check_integrity();
    }

    #[test]
    fn disable_keeps_data_and_archetype() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Pos { x: 3.0, y: 4.0 });
        let archetype = world.archetype_of(e).unwrap().id();

        world.disable_component::<Pos>(e);
        assert!(!world.is_component_enabled::<Pos>(e));
        assert!(world.has_component::<Pos>(e));
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 3.0, y: 4.0 }));
        assert_eq!(world.archetype_of(e).unwrap().id(), archetype);

        world.enable_component::<Pos>(e);
        assert!(world.is_component_enabled::<Pos>(e));
        world.check_integrity();
    }

    #[test]
    fn recycled_handle_does_not_see_previous_components() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Pos { x: 1.0, y: 1.0 });
        world.despawn(e);

        let e2 = world.spawn();
        // Same slot, new generation; no components carried over.
        assert!(world.is_alive(e2));
        assert!(!world.is_alive(e));
        assert_eq!(world.get_component::<Pos>(e2), None);
        world.check_integrity();
    }

    #[test]
    fn unversioned_world_recycles_bitwise_identical_handles() {
        let mut world = World::with_entity_layout(false, 16).unwrap();
        let e = world.spawn();
        world.despawn(e);
        let e2 = world.spawn();
        assert_eq!(e.to_raw(), e2.to_raw());
    }

    #[test]
    fn drop_glue_runs_for_despawned_values() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked(#[allow(dead_code)] u32);
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut world = World::new();
        let e = world.spawn();
        world.insert_component(e, Tracked(7));
        world.despawn(e);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }
}
