use smallvec::SmallVec;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{AccessMode, ComponentTypeId};
use crate::util::{hash_u32_slice, HashIndex};

const MAX_QUERIES: usize = 1024;

/// Bitmask id (index + bit) unique within a `World`, capped at
/// `MAX_QUERIES` live queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryId(u32);

impl QueryId {
    pub(crate) fn new(slot: u32) -> Self {
        QueryId(slot)
    }

    pub(crate) fn slot(self) -> usize {
        self.0 as usize
    }

    pub fn mask_index(self) -> usize {
        (self.0 / 8) as usize
    }

    pub fn mask_bit(self) -> u8 {
        (self.0 % 8) as u8
    }
}

/// One descriptor in a `CreateQuery` call: a component id paired with the
/// access mode the caller wants for it. `AccessMode::Exclude` routes the
/// id into the query's `None` set; `AccessMode::Any` routes it into `Any`;
/// everything else routes into `All`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryTerm {
    pub component: ComponentTypeId,
    pub access: AccessMode,
}

impl QueryTerm {
    pub fn read(component: ComponentTypeId) -> Self {
        QueryTerm {
            component,
            access: AccessMode::ReadOnly,
        }
    }

    pub fn write(component: ComponentTypeId) -> Self {
        QueryTerm {
            component,
            access: AccessMode::ReadWrite,
        }
    }

    pub fn any(component: ComponentTypeId) -> Self {
        QueryTerm {
            component,
            access: AccessMode::Any,
        }
    }

    pub fn exclude(component: ComponentTypeId) -> Self {
        QueryTerm {
            component,
            access: AccessMode::Exclude,
        }
    }
}

fn merge_join_contains_all(needles: &[ComponentTypeId], haystack: &[ComponentTypeId]) -> bool {
    let mut hi = 0;
    for &needle in needles {
        while hi < haystack.len() && haystack[hi] < needle {
            hi += 1;
        }
        if hi >= haystack.len() || haystack[hi] != needle {
            return false;
        }
        hi += 1;
    }
    true
}

fn merge_join_intersects(a: &[ComponentTypeId], b: &[ComponentTypeId]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            return true;
        } else if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    false
}

/// Canonical `(All, Any, None)` component-set predicate with access-mode
/// annotation. Interned per `World`; owns a cached list of matching
/// archetypes kept current as archetypes are created.
pub struct EntityQuery {
    pub(crate) id: QueryId,
    all_ids: Box<[ComponentTypeId]>,
    all_modes: Box<[AccessMode]>,
    any_ids: Box<[ComponentTypeId]>,
    any_modes: Box<[AccessMode]>,
    none_ids: Box<[ComponentTypeId]>,
    none_modes: Box<[AccessMode]>,
    pub(crate) matching_archetypes: Vec<ArchetypeId>,
}

impl EntityQuery {
    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn all(&self) -> &[ComponentTypeId] {
        &self.all_ids
    }

    pub fn any(&self) -> &[ComponentTypeId] {
        &self.any_ids
    }

    pub fn none(&self) -> &[ComponentTypeId] {
        &self.none_ids
    }

    /// The `All` ids declared for read-write access: the set the job runner
    /// stamps a chunk's change version for on every visit.
    pub(crate) fn write_ids(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.all_ids
            .iter()
            .zip(self.all_modes.iter())
            .filter(|(_, mode)| **mode == AccessMode::ReadWrite)
            .map(|(id, _)| *id)
    }

    /// Merge-joins `All` (every id must be present), `Any` (at least one
    /// id present, when non-empty), and `None` (no id present) against an
    /// archetype's sorted type list.
    pub(crate) fn is_match(&self, archetype: &Archetype) -> bool {
        let types = archetype.component_types();
        if !merge_join_contains_all(&self.all_ids, types) {
            return false;
        }
        if !self.any_ids.is_empty() && !merge_join_intersects(&self.any_ids, types) {
            return false;
        }
        if merge_join_intersects(&self.none_ids, types) {
            return false;
        }
        true
    }
}

fn canonicalize(mut desc: Vec<QueryTerm>) -> EntityQuery {
    desc.sort_by(|a, b| (a.component, a.access).cmp(&(b.component, b.access)));

    let mut all_ids = Vec::new();
    let mut all_modes = Vec::new();
    let mut any_ids = Vec::new();
    let mut any_modes = Vec::new();
    let mut none_ids = Vec::new();
    let mut none_modes = Vec::new();

    for term in desc {
        match term.access {
            AccessMode::Exclude => {
                none_ids.push(term.component);
                none_modes.push(term.access);
            }
            AccessMode::Any => {
                any_ids.push(term.component);
                any_modes.push(term.access);
            }
            AccessMode::ReadOnly | AccessMode::ReadWrite => {
                all_ids.push(term.component);
                all_modes.push(term.access);
            }
        }
    }

    EntityQuery {
        id: QueryId(0),
        all_ids: all_ids.into_boxed_slice(),
        all_modes: all_modes.into_boxed_slice(),
        any_ids: any_ids.into_boxed_slice(),
        any_modes: any_modes.into_boxed_slice(),
        none_ids: none_ids.into_boxed_slice(),
        none_modes: none_modes.into_boxed_slice(),
        matching_archetypes: Vec::new(),
    }
}

fn hash_query(query: &EntityQuery) -> u32 {
    let mut buf: SmallVec<[u32; 32]> = SmallVec::with_capacity(
        query.all_ids.len() * 2 + query.any_ids.len() * 2 + query.none_ids.len() * 2,
    );
    buf.extend(query.all_ids.iter().map(|id| id.0));
    buf.extend(query.all_modes.iter().map(|m| *m as u32));
    buf.extend(query.any_ids.iter().map(|id| id.0));
    buf.extend(query.any_modes.iter().map(|m| *m as u32));
    buf.extend(query.none_ids.iter().map(|id| id.0));
    buf.extend(query.none_modes.iter().map(|m| *m as u32));
    hash_u32_slice(&buf)
}

fn queries_equal(a: &EntityQuery, b: &EntityQuery) -> bool {
    a.all_ids == b.all_ids
        && a.all_modes == b.all_modes
        && a.any_ids == b.any_ids
        && a.any_modes == b.any_modes
        && a.none_ids == b.none_ids
        && a.none_modes == b.none_modes
}

/// Interning map from a query's six-array hash to its slot in the
/// `EntityManager`'s query list.
pub(crate) struct QueryMap {
    index: HashIndex<QueryId>,
}

impl QueryMap {
    pub(crate) fn new() -> Self {
        QueryMap {
            index: HashIndex::new(),
        }
    }

    pub(crate) fn find(
        &self,
        hash: u32,
        queries: &[Box<EntityQuery>],
        candidate: &EntityQuery,
    ) -> Option<QueryId> {
        self.index
            .find(hash, |id| queries_equal(&queries[id.slot()], candidate))
            .map(|slot| *self.index.get(slot))
    }

    pub(crate) fn insert(&mut self, hash: u32, id: QueryId) {
        self.index.insert(hash, id);
    }
}

/// Upper bound on live queries per `World`, enforced when interning a
/// fresh (not-yet-seen) descriptor.
pub(crate) const MAX_QUERY_COUNT: usize = MAX_QUERIES;

/// Builds the canonical query and computes its interning hash. The `id`
/// field is a placeholder until the `EntityManager` decides whether this
/// is a cache hit (existing id) or a fresh slot (`assign_id`).
pub(crate) fn prepare_query(desc: Vec<QueryTerm>) -> (EntityQuery, u32) {
    let query = canonicalize(desc);
    let hash = hash_query(&query);
    (query, hash)
}

pub(crate) fn assign_id(query: &mut EntityQuery, id: QueryId) {
    query.id = id;
}
