//! Typed queries over the archetype primitive.
//!
//! The core lookup is [`World::archetypes_with`]: intersect the reverse
//! component index and yield every archetype whose data signature is a
//! superset of the request. This module builds the thin ergonomic layer on
//! top: tuple queries that iterate `(EntityId, (&A, &B, ...))` rows across
//! all matching archetypes.
//!
//! Typed queries cover data components only (a tag owns no column to borrow
//! from) and honour enable-state: archetypes where a requested component is
//! disabled are skipped.
//!
//! ## Soundness
//!
//! Read-only queries (`&T`) use [`World::query`], which takes `&self`.
//! Mutable queries (`&mut T`) use [`World::query_mut`], which takes
//! `&mut self`, guaranteeing exclusive access to the world and preventing
//! aliasing; the query is additionally validated against requesting the same
//! component mutably twice.

use crate::archetype::ArchetypeId;
use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::world::World;

// ---------------------------------------------------------------------------
// QueryItem -- one element of a query tuple
// ---------------------------------------------------------------------------

/// A single element of a query fetch: `&T` (read) or `&mut T` (write).
pub trait QueryItem {
    /// The output type yielded per row.
    type Item<'w>;
    /// Whether this item borrows mutably.
    const MUTABLE: bool;
    /// The component id this item accesses, if registered.
    fn component_id(world: &World) -> Option<ComponentId>;
    /// Fetch one item from an archetype row.
    ///
    /// For `&T` items this is safe with `&World`. For `&mut T` items the
    /// caller must guarantee exclusive world access (via `query_mut`'s
    /// `&mut self` receiver).
    fn fetch(world: &World, archetype: ArchetypeId, row: usize) -> Self::Item<'_>;
}

impl<T: 'static> QueryItem for &T {
    type Item<'w> = &'w T;
    const MUTABLE: bool = false;

    fn component_id(world: &World) -> Option<ComponentId> {
        world.component_id::<T>()
    }

    fn fetch(world: &World, archetype: ArchetypeId, row: usize) -> Self::Item<'_> {
        let component = world
            .component_id::<T>()
            .expect("query matched an unregistered component");
        world
            .archetype_graph()
            .get(archetype)
            .get_ref::<T>(component, row)
            .expect("query matched an archetype without the component")
    }
}

impl<T: 'static> QueryItem for &mut T {
    type Item<'w> = &'w mut T;
    const MUTABLE: bool = true;

    fn component_id(world: &World) -> Option<ComponentId> {
        world.component_id::<T>()
    }

    fn fetch(world: &World, archetype: ArchetypeId, row: usize) -> Self::Item<'_> {
        let component = world
            .component_id::<T>()
            .expect("query matched an unregistered component");
        // Safety: only reachable through World::query_mut, whose `&mut self`
        // receiver guarantees exclusive access; aliasing within one row is
        // ruled out by the duplicate-access validation.
        unsafe {
            let world = world as *const World as *mut World;
            (*world)
                .graph_mut()
                .get_mut(archetype)
                .get_mut::<T>(component, row)
                .expect("query matched an archetype without the component")
        }
    }
}

// ---------------------------------------------------------------------------
// Query -- a tuple of QueryItems
// ---------------------------------------------------------------------------

/// A tuple of query items: `(&A, &B)`, `(&mut A, &B)`, and so on.
pub trait Query {
    /// The per-row output type.
    type Item<'w>;
    /// Whether any item borrows mutably.
    const HAS_MUTABLE: bool;
    /// The component ids the tuple accesses; `None` when any type is
    /// unregistered (such a query matches nothing).
    fn component_ids(world: &World) -> Option<Vec<ComponentId>>;
    /// Panic when the tuple requests conflicting access to one component.
    fn validate_access(world: &World);
    /// Fetch one row.
    fn fetch_row(world: &World, archetype: ArchetypeId, row: usize) -> Self::Item<'_>;
}

/// Reject `&mut T` twice and `&T` + `&mut T` over the same component.
fn validate_no_access_conflicts(items: &[(bool, Option<ComponentId>)]) {
    let mut mutable: Vec<ComponentId> = Vec::new();
    let mut read: Vec<ComponentId> = Vec::new();
    for &(is_mutable, component) in items {
        let Some(component) = component else { continue };
        if is_mutable {
            if mutable.contains(&component) {
                panic!("query requests duplicate mutable access to one component type");
            }
            if read.contains(&component) {
                panic!("query requests overlapping read and mutable access to one component type");
            }
            mutable.push(component);
        } else {
            if mutable.contains(&component) {
                panic!("query requests overlapping read and mutable access to one component type");
            }
            read.push(component);
        }
    }
}

macro_rules! impl_query_for_tuple {
    ($($item:ident),+) => {
        impl<$($item: QueryItem),+> Query for ($($item,)+) {
            type Item<'w> = ($($item::Item<'w>,)+);
            const HAS_MUTABLE: bool = $($item::MUTABLE)|+;

            fn component_ids(world: &World) -> Option<Vec<ComponentId>> {
                Some(vec![$($item::component_id(world)?),+])
            }

            fn validate_access(world: &World) {
                let items = [$(($item::MUTABLE, $item::component_id(world))),+];
                validate_no_access_conflicts(&items);
            }

            fn fetch_row(world: &World, archetype: ArchetypeId, row: usize) -> Self::Item<'_> {
                ($($item::fetch(world, archetype, row),)+)
            }
        }
    };
}

impl_query_for_tuple!(A);
impl_query_for_tuple!(A, B);
impl_query_for_tuple!(A, B, C);
impl_query_for_tuple!(A, B, C, D);

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

/// Iterator yielding `(EntityId, Q::Item)` for every matching row.
///
/// The archetype set is fixed when the iterator is created; it is stable for
/// the iterator's lifetime because the borrow on the world blocks mutation.
pub struct QueryIter<'w, Q: Query> {
    world: &'w World,
    archetypes: Vec<ArchetypeId>,
    archetype_cursor: usize,
    row_cursor: usize,
    _marker: std::marker::PhantomData<Q>,
}

impl<'w, Q: Query> QueryIter<'w, Q> {
    pub(crate) fn new(world: &'w World, archetypes: Vec<ArchetypeId>) -> Self {
        Self {
            world,
            archetypes,
            archetype_cursor: 0,
            row_cursor: 0,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<'w, Q: Query> Iterator for QueryIter<'w, Q> {
    type Item = (EntityId, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let &archetype = self.archetypes.get(self.archetype_cursor)?;
            let resident = self.world.archetype_graph().get(archetype);
            if self.row_cursor < resident.len() {
                let entity = resident.entities()[self.row_cursor];
                let item = Q::fetch_row(self.world, archetype, self.row_cursor);
                self.row_cursor += 1;
                return Some((entity, item));
            }
            self.archetype_cursor += 1;
            self.row_cursor = 0;
        }
    }
}

/// Mutable sibling of [`QueryIter`], constructed only through
/// [`World::query_mut`] so the `'w` lifetime carries exclusive world access.
pub struct QueryIterMut<'w, Q: Query> {
    world: &'w World,
    archetypes: Vec<ArchetypeId>,
    archetype_cursor: usize,
    row_cursor: usize,
    _marker: std::marker::PhantomData<Q>,
}

impl<'w, Q: Query> QueryIterMut<'w, Q> {
    /// The caller must derive `world` from a `&mut World` borrow.
    pub(crate) fn new(world: &'w World, archetypes: Vec<ArchetypeId>) -> Self {
        Self {
            world,
            archetypes,
            archetype_cursor: 0,
            row_cursor: 0,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<'w, Q: Query> Iterator for QueryIterMut<'w, Q> {
    type Item = (EntityId, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let &archetype = self.archetypes.get(self.archetype_cursor)?;
            let resident = self.world.archetype_graph().get(archetype);
            if self.row_cursor < resident.len() {
                let entity = resident.entities()[self.row_cursor];
                let item = Q::fetch_row(self.world, archetype, self.row_cursor);
                self.row_cursor += 1;
                return Some((entity, item));
            }
            self.archetype_cursor += 1;
            self.row_cursor = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// World query methods
// ---------------------------------------------------------------------------

impl World {
    fn matching_enabled(&self, components: &[ComponentId]) -> Vec<ArchetypeId> {
        self.archetype_graph()
            .matching(components)
            .into_iter()
            .filter(|&id| {
                let archetype = self.archetype_graph().get(id);
                components.iter().all(|&c| archetype.is_enabled(c))
            })
            .collect()
    }

    /// Run a read-only query over all matching entities.
    ///
    /// ```
    /// # use strata_ecs::prelude::*;
    /// # #[derive(Debug, PartialEq)] struct Pos { x: f32 }
    /// # let mut world = World::new();
    /// # let e = world.spawn();
    /// # world.insert_component(e, Pos { x: 1.0 });
    /// for (entity, (pos,)) in world.query::<(&Pos,)>() {
    ///     println!("{entity:?} at {}", pos.x);
    /// }
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the tuple contains `&mut T` items; use
    /// [`query_mut`](Self::query_mut) for those.
    pub fn query<Q: Query>(&self) -> QueryIter<'_, Q> {
        assert!(
            !Q::HAS_MUTABLE,
            "World::query() cannot be used with mutable query items (&mut T); \
             use World::query_mut(), which requires &mut self"
        );
        let archetypes = match Q::component_ids(self) {
            Some(ids) => self.matching_enabled(&ids),
            None => Vec::new(),
        };
        QueryIter::new(self, archetypes)
    }

    /// Run a query that may borrow components mutably.
    ///
    /// ```
    /// # use strata_ecs::prelude::*;
    /// # #[derive(Debug, PartialEq)] struct Pos { x: f32 }
    /// # #[derive(Debug, PartialEq)] struct Vel { dx: f32 }
    /// # let mut world = World::new();
    /// # let e = world.spawn();
    /// # world.insert_component(e, Pos { x: 1.0 });
    /// # world.insert_component(e, Vel { dx: 2.0 });
    /// for (_entity, (pos, vel)) in world.query_mut::<(&mut Pos, &Vel)>() {
    ///     pos.x += vel.dx;
    /// }
    /// ```
    ///
    /// # Panics
    ///
    /// Panics when the tuple requests conflicting access to one component
    /// type.
    pub fn query_mut<Q: Query>(&mut self) -> QueryIterMut<'_, Q> {
        Q::validate_access(self);
        let archetypes = match Q::component_ids(self) {
            Some(ids) => self.matching_enabled(&ids),
            None => Vec::new(),
        };
        QueryIterMut::new(self, archetypes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::world::World;

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
    struct Health(u32);

    fn spawn_with_pos(world: &mut World, x: f32, y: f32) -> crate::entity::EntityId {
        let e = world.spawn();
        world.insert_component(e, Pos { x, y });
        e
    }

    #[test]
    fn query_yields_matching_rows_only() {
        let mut world = World::new();
        let e1 = spawn_with_pos(&mut world, 1.0, 2.0);
        world.insert_component(e1, Vel { dx: 3.0, dy: 4.0 });
        let _e2 = spawn_with_pos(&mut world, 10.0, 20.0);

        let results: Vec<_> = world.query::<(&Pos, &Vel)>().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, e1);
        assert_eq!(results[0].1 .0, &Pos { x: 1.0, y: 2.0 });
    }

    #[test]
    fn query_spans_multiple_archetypes() {
        let mut world = World::new();
        for i in 0..3 {
            spawn_with_pos(&mut world, i as f32, 0.0);
        }
        let e = spawn_with_pos(&mut world, 99.0, 0.0);
        world.insert_component(e, Vel { dx: 0.0, dy: 0.0 });

        assert_eq!(world.query::<(&Pos,)>().count(), 4);
        assert_eq!(world.query::<(&Pos, &Vel)>().count(), 1);
    }

    #[test]
    fn unregistered_component_matches_nothing() {
        let mut world = World::new();
        spawn_with_pos(&mut world, 0.0, 0.0);
        assert_eq!(world.query::<(&Health,)>().count(), 0);
    }

    #[test]
    fn mutable_query_writes_through() {
        let mut world = World::new();
        let e = spawn_with_pos(&mut world, 0.0, 0.0);
        world.insert_component(e, Vel { dx: 1.0, dy: 2.0 });

        for (_entity, (pos, vel)) in world.query_mut::<(&mut Pos, &Vel)>() {
            pos.x += vel.dx;
            pos.y += vel.dy;
        }
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn disabled_component_hides_archetype() {
        let mut world = World::new();
        let e = spawn_with_pos(&mut world, 1.0, 1.0);
        assert_eq!(world.query::<(&Pos,)>().count(), 1);

        world.disable_component::<Pos>(e);
        assert_eq!(world.query::<(&Pos,)>().count(), 0);

        world.enable_component::<Pos>(e);
        assert_eq!(world.query::<(&Pos,)>().count(), 1);
    }

    #[test]
    fn column_slices_are_contiguous_per_archetype() {
        let mut world = World::new();
        for i in 0..5 {
            spawn_with_pos(&mut world, i as f32, 0.0);
        }
        let pos = world.component_id::<Pos>().unwrap();

        let mut total = 0;
        for archetype in world.archetypes_with(&[pos]) {
            let table = archetype.column_slice::<Pos>().unwrap();
            assert_eq!(table.len(), archetype.len());
            total += table.len();
        }
        assert_eq!(total, 5);
    }

    #[test]
    fn mutable_tables_write_through() {
        let mut world = World::new();
        for i in 0..4 {
            spawn_with_pos(&mut world, i as f32, 0.0);
        }
        let pos = world.component_id::<Pos>().unwrap();
        let archetype = world.archetypes_with(&[pos]).next().unwrap().id();

        for p in world.table_mut::<Pos>(archetype).unwrap() {
            p.x *= 2.0;
        }
        let sum: f32 = world
            .table::<Pos>(archetype)
            .unwrap()
            .iter()
            .map(|p| p.x)
            .sum();
        assert_eq!(sum, 12.0);
    }

    #[test]
    #[should_panic(expected = "cannot be used with mutable query items")]
    fn query_rejects_mutable_items() {
        let mut world = World::new();
        spawn_with_pos(&mut world, 0.0, 0.0);
        let _ = world.query::<(&mut Pos,)>().count();
    }

    #[test]
    #[should_panic(expected = "duplicate mutable access")]
    fn query_mut_rejects_aliased_mutables() {
        let mut world = World::new();
        spawn_with_pos(&mut world, 0.0, 0.0);
        let _ = world.query_mut::<(&mut Pos, &mut Pos)>().count();
    }

    #[test]
    #[should_panic(expected = "overlapping read and mutable access")]
    fn query_mut_rejects_read_write_overlap() {
        let mut world = World::new();
        spawn_with_pos(&mut world, 0.0, 0.0);
        let _ = world.query_mut::<(&mut Pos, &Pos)>().count();
    }
}
