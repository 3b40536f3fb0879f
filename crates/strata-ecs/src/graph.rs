//! The archetype graph: interning by signature hash, the reverse component
//! index, and cached add/remove transitions.
//!
//! Archetypes are created on first demand and retained for the world's
//! lifetime, empty or not; an empty archetype is a cheap cache entry for the
//! signature and its edges. Edges memoise single-component transitions;
//! correctness never depends on them, since a cache miss falls back to
//! deriving the destination signature and interning it.

use std::collections::HashMap;

use tracing::trace;

use crate::archetype::{Archetype, ArchetypeId, Signature};
use crate::component::{ComponentId, ComponentRegistry};

/// Owns every archetype of one world and the indexes over them.
#[derive(Debug, Default)]
pub struct ArchetypeGraph {
    /// All archetypes, indexed by `ArchetypeId.0`.
    archetypes: Vec<Archetype>,
    /// Signature hash -> archetype.
    by_hash: HashMap<u64, ArchetypeId>,
    /// Data component -> archetypes whose signature carries it.
    by_component: HashMap<ComponentId, Vec<ArchetypeId>>,
}

impl ArchetypeGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of archetypes interned so far.
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Whether no archetype has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// The archetype for `id`.
    ///
    /// # Panics
    ///
    /// Panics on an id from another world; ids are never dropped, so any id
    /// issued by this graph stays valid.
    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.0 as usize]
    }

    /// All archetypes, in creation order.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Mutable access to two distinct archetypes at once, for cross-archetype
    /// moves.
    ///
    /// # Panics
    ///
    /// Panics when `a == b`.
    pub(crate) fn pair_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "pair_mut requires distinct archetypes");
        let (ai, bi) = (a.0 as usize, b.0 as usize);
        if ai < bi {
            let (left, right) = self.archetypes.split_at_mut(bi);
            (&mut left[ai], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(ai);
            (&mut right[0], &mut left[bi])
        }
    }

    /// Return the archetype for `signature`, creating and indexing it on
    /// first demand.
    pub(crate) fn intern(
        &mut self,
        signature: Signature,
        registry: &ComponentRegistry,
    ) -> ArchetypeId {
        let hash = signature.hash();
        if let Some(&id) = self.by_hash.get(&hash) {
            debug_assert_eq!(
                self.archetypes[id.0 as usize].signature(),
                &signature,
                "signature hash collision"
            );
            return id;
        }

        let id = ArchetypeId(self.archetypes.len() as u32);
        let archetype = Archetype::new(id, signature, registry);
        for &component in archetype.signature().components() {
            self.by_component.entry(component).or_default().push(id);
        }
        trace!(
            hash,
            components = archetype.signature().components().len(),
            tags = archetype.signature().tags().len(),
            "created archetype"
        );
        self.by_hash.insert(hash, id);
        self.archetypes.push(archetype);
        id
    }

    /// Destination archetype for adding `component` to `from`, resolved
    /// through the edge cache.
    pub(crate) fn add_target(
        &mut self,
        from: ArchetypeId,
        component: ComponentId,
        registry: &ComponentRegistry,
    ) -> ArchetypeId {
        if let Some(to) = self.get(from).add_edge(component) {
            return to;
        }
        let tag = registry
            .info(component)
            .expect("add_target: unregistered component")
            .is_tag();
        let signature = self.get(from).signature().with(component, tag);
        let to = self.intern(signature, registry);
        self.get_mut(from).set_add_edge(component, to);
        to
    }

    /// Destination archetype for removing `component` from `from`, resolved
    /// through the edge cache.
    pub(crate) fn remove_target(
        &mut self,
        from: ArchetypeId,
        component: ComponentId,
        registry: &ComponentRegistry,
    ) -> ArchetypeId {
        if let Some(to) = self.get(from).remove_edge(component) {
            return to;
        }
        let signature = self.get(from).signature().without(component);
        let to = self.intern(signature, registry);
        self.get_mut(from).set_remove_edge(component, to);
        to
    }

    /// Ids of all archetypes whose data signature contains every id in
    /// `components`. An empty request matches every archetype.
    pub(crate) fn matching(&self, components: &[ComponentId]) -> Vec<ArchetypeId> {
        let Some(first) = components.first() else {
            return self.archetypes.iter().map(Archetype::id).collect();
        };
        // Seed from the reverse index of the first id; the rest are checked
        // against each candidate's signature.
        let Some(seed) = self.by_component.get(first) else {
            return Vec::new();
        };
        seed.iter()
            .copied()
            .filter(|&id| {
                components[1..]
                    .iter()
                    .all(|&c| self.get(id).signature().contains_component(c))
            })
            .collect()
    }

    /// All archetypes whose data signature contains every id in `components`,
    /// each yielded at most once, in creation order.
    pub fn archetypes_with(
        &self,
        components: &[ComponentId],
    ) -> impl Iterator<Item = &Archetype> {
        self.matching(components).into_iter().map(|id| self.get(id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
