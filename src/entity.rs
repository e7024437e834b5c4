use crate::archetype::{Archetype, ArchetypeId, ArchetypeListMap};
use crate::chunk::{ChunkAllocator, ChunkPtr};
use crate::component::{ComponentTypeId, Entity, TypeRegistry};
use crate::query::{self, EntityQuery, QueryId, QueryMap, QueryTerm, MAX_QUERY_COUNT};
use crate::util::hash_u32_slice;
use smallvec::SmallVec;

const INITIAL_CAPACITY: usize = 1024;
const MAX_CAPACITY: usize = 128_000_000;

enum SlotState {
    Free { next: i32 },
    Live {
        chunk: ChunkPtr,
        index_in_chunk: i32,
        archetype: ArchetypeId,
    },
}

struct EntitySlot {
    version: u32,
    state: SlotState,
}

/// Dense `entity index -> (version, chunk location)` table with an
/// intrusive freelist threaded through the `next` field of unused slots.
/// `version` survives across `Free`/`Live` transitions: it only ever
/// increases, on every destroy, which is what invalidates stale `Entity`
/// handles that still name a recycled index.
struct ReverseMap {
    slots: Vec<EntitySlot>,
    next_free: i32,
}

impl ReverseMap {
    fn new() -> Self {
        ReverseMap {
            slots: Vec::new(),
            next_free: -1,
        }
    }

    /// Doubles capacity (or adopts `INITIAL_CAPACITY` from empty), chaining
    /// the newly added slots into a fresh freelist. Only called when the
    /// existing freelist is exhausted (`next_free == -1`): entities are
    /// always handed out of one growth before the next is needed.
    fn grow(&mut self) {
        debug_assert_eq!(self.next_free, -1);
        let old_capacity = self.slots.len();
        let new_capacity = if old_capacity == 0 {
            INITIAL_CAPACITY
        } else {
            old_capacity * 2
        };
        assert!(
            new_capacity <= MAX_CAPACITY,
            "entity reverse map exhausted: already at {} entities",
            MAX_CAPACITY
        );
        self.slots.reserve(new_capacity - old_capacity);
        for i in old_capacity..new_capacity {
            let next = if i + 1 < new_capacity { i as i32 + 1 } else { -1 };
            self.slots.push(EntitySlot {
                version: 1,
                state: SlotState::Free { next },
            });
        }
        self.next_free = old_capacity as i32;
    }

    fn alloc_index(&mut self) -> i32 {
        if self.next_free == -1 {
            self.grow();
        }
        let index = self.next_free;
        match self.slots[index as usize].state {
            SlotState::Free { next } => self.next_free = next,
            SlotState::Live { .. } => unreachable!("freelist head is not free"),
        }
        index
    }

    fn set_live(&mut self, index: i32, chunk: ChunkPtr, index_in_chunk: i32, archetype: ArchetypeId) -> Entity {
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::Live {
            chunk,
            index_in_chunk,
            archetype,
        };
        Entity {
            index,
            version: slot.version,
        }
    }

    fn free_index(&mut self, index: i32) {
        let slot = &mut self.slots[index as usize];
        slot.version = slot.version.wrapping_add(1);
        slot.state = SlotState::Free { next: self.next_free };
        self.next_free = index;
    }

    fn relocate(&mut self, index: i32, new_index_in_chunk: i32) {
        if let SlotState::Live { index_in_chunk, .. } = &mut self.slots[index as usize].state {
            *index_in_chunk = new_index_in_chunk;
        }
    }

    fn version(&self, index: i32) -> u32 {
        self.slots[index as usize].version
    }

    fn location(&self, index: i32) -> Option<(ChunkPtr, i32, ArchetypeId)> {
        match self.slots[index as usize].state {
            SlotState::Live {
                chunk,
                index_in_chunk,
                archetype,
            } => Some((chunk, index_in_chunk, archetype)),
            SlotState::Free { .. } => None,
        }
    }
}

/// Outcome of matching a prefix of a `DestroyEntities` batch against the
/// reverse map: every entity in the prefix either lives in `chunk` at
/// consecutive rows starting at `chunk_base_index`, or (`chunk` is `None`)
/// the whole prefix was already destroyed and nothing needs doing.
struct EntityRange {
    chunk: Option<ChunkPtr>,
    chunk_base_index: i32,
    count: i32,
}

/// Erases every component value at `remove_index`, then (unless it is
/// already the chunk's last live row) moves the last live row down into
/// its place. Caller is responsible for decrementing the chunk's entity
/// count and fixing up the reverse map for whichever entity got moved.
///
/// # Safety
/// `chunk` must belong to `archetype`; `remove_index` and `last_index`
/// must both be valid, currently-live rows in it.
unsafe fn destroy_row(
    registry: &TypeRegistry,
    archetype: &Archetype,
    chunk: ChunkPtr,
    last_index: i32,
    remove_index: i32,
) {
    for (col, &type_id) in archetype.component_types().iter().enumerate() {
        let info = registry.get(type_id);
        let offset = archetype.offsets[col] as usize;
        let size = archetype.sizes[col] as usize;
        let ptr = chunk.payload_ptr().add(offset + remove_index as usize * size);
        (info.drop_in_place)(ptr);
    }
    if remove_index != last_index {
        for (&size, &offset) in archetype.sizes.iter().zip(archetype.offsets.iter()) {
            let size = size as usize;
            let base = chunk.payload_ptr().add(offset);
            let src = base.add(last_index as usize * size);
            let dst = base.add(remove_index as usize * size);
            core::ptr::copy_nonoverlapping(src, dst, size);
        }
    }
}

/// Owns every archetype and query a `World` has interned, the chunk
/// directory each archetype keeps, and the entity index -> chunk-location
/// reverse map. Free-standing from `World` so it can be driven with
/// explicit `&TypeRegistry` / `&mut ChunkAllocator` borrows rather than a
/// back-reference to its owner.
pub struct EntityManager {
    archetypes: Vec<Box<Archetype>>,
    archetype_map: ArchetypeListMap,
    queries: Vec<Box<EntityQuery>>,
    query_map: QueryMap,
    reverse: ReverseMap,
    next_chunk_sequence: u64,
    pub(crate) entity_create_destroy_version: u32,
}

impl EntityManager {
    pub(crate) fn new() -> Self {
        EntityManager {
            archetypes: Vec::new(),
            archetype_map: ArchetypeListMap::new(),
            queries: Vec::new(),
            query_map: QueryMap::new(),
            reverse: ReverseMap::new(),
            next_chunk_sequence: 0,
            entity_create_destroy_version: 0,
        }
    }

    pub(crate) fn archetype(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.index()]
    }

    pub(crate) fn archetype_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.index()]
    }

    pub(crate) fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub(crate) fn query(&self, id: QueryId) -> &EntityQuery {
        &self.queries[id.slot()]
    }

    pub(crate) fn entity_location(&self, entity: Entity) -> Option<(ChunkPtr, i32, ArchetypeId)> {
        if self.reverse.version(entity.index) != entity.version {
            return None;
        }
        self.reverse.location(entity.index)
    }

    /// Interns the archetype for `ids` (implicitly adding `Entity` and
    /// sorting), creating it and back-filling matching-query lists on a
    /// cache miss.
    pub(crate) fn create_archetype(
        &mut self,
        registry: &TypeRegistry,
        mut ids: Vec<ComponentTypeId>,
    ) -> ArchetypeId {
        if !ids.contains(&ComponentTypeId::ENTITY) {
            ids.push(ComponentTypeId::ENTITY);
        }
        ids.sort_unstable();
        ids.dedup();
        for &id in &ids {
            assert!(registry.contains(id), "archetype references unregistered component {}", id);
        }

        let raw = ids.iter().map(|id| id.0).collect::<SmallVec<[u32; 16]>>();
        let hash = hash_u32_slice(&raw);
        if let Some(existing) = self.archetype_map.find(hash, &self.archetypes, &ids) {
            log::trace!("archetype {:?}: cache hit for {:?}", existing, ids);
            return existing;
        }

        let sizes: Vec<u16> = ids.iter().map(|&id| registry.get(id).size_bytes).collect();
        let archetype_id = ArchetypeId(self.archetypes.len() as u32);
        log::debug!("archetype {:?}: created for component set {:?}", archetype_id, ids);
        let mut archetype = Box::new(Archetype::new(
            archetype_id,
            ids.into_boxed_slice(),
            sizes.into_boxed_slice(),
        ));
        for query in &mut self.queries {
            if query.is_match(&archetype) {
                query.matching_archetypes.push(archetype_id);
                archetype.matching_queries.push(query.id());
            }
        }
        self.archetypes.push(archetype);
        self.archetype_map.insert(hash, archetype_id);
        archetype_id
    }

    /// Fills `out` with freshly created entities of `archetype_id`,
    /// reusing any chunk with spare rows before allocating new ones.
    /// `global_version` stamps the change-version row of every chunk
    /// touched, new or existing.
    pub(crate) fn create_entities(
        &mut self,
        chunk_allocator: &mut ChunkAllocator,
        archetype_id: ArchetypeId,
        out: &mut [Entity],
        global_version: u32,
    ) {
        let mut written = 0;
        while written < out.len() {
            let archetype = &mut self.archetypes[archetype_id.index()];
            let list_index = match archetype.free_chunks.last().copied() {
                Some(list_index) => list_index,
                None => {
                    let chunk = chunk_allocator.allocate();
                    unsafe {
                        let header = chunk.header_mut();
                        header.archetype = archetype_id;
                        header.entity_count = 0;
                        header.entity_capacity = archetype.chunk_entity_capacity() as i32;
                        header.sequence = self.next_chunk_sequence;
                    }
                    self.next_chunk_sequence += 1;
                    archetype.add_chunk(chunk, global_version)
                }
            };

            let archetype = &mut self.archetypes[archetype_id.index()];
            let chunk = archetype.chunk(list_index);
            let capacity = archetype.chunk_entity_capacity() as i32;
            let old_len = archetype.entity_count_at(list_index);
            let mut len = old_len;
            let entity_ptr = chunk.payload_ptr() as *mut Entity;

            while len < capacity && written < out.len() {
                let index = self.reverse.alloc_index();
                let entity = self.reverse.set_live(index, chunk, len, archetype_id);
                unsafe {
                    entity_ptr.add(len as usize).write(entity);
                }
                out[written] = entity;
                written += 1;
                len += 1;
            }

            archetype.set_entity_count_at(list_index, len);
            archetype.entity_count += (len - old_len) as u32;
            unsafe {
                chunk.header_mut().entity_count = len;
            }
            if len == capacity {
                let free_list_index = unsafe { chunk.header().free_list_index };
                archetype.remove_from_free_list(free_list_index as usize);
            }
        }
        self.entity_create_destroy_version = self.entity_create_destroy_version.wrapping_add(1);
    }

    /// Matches the longest prefix of `entities` that either shares a single
    /// chunk (a contiguous live run) or is entirely already-destroyed.
    ///
    /// A handle whose index currently names a *different* live entity (the
    /// slot was recycled) can only ever be the sole member of its own
    /// range: it is stale and the call is a no-op for it, but letting it
    /// merge into either kind of run would read the wrong row.
    fn find_first_entity_range(&self, entities: &[Entity]) -> EntityRange {
        let base = entities[0];
        let base_live = self.reverse.version(base.index) == base.version;
        let base_location = self.reverse.location(base.index);

        if !base_live && base_location.is_some() {
            return EntityRange {
                chunk: None,
                chunk_base_index: 0,
                count: 1,
            };
        }

        let base_chunk = if base_live {
            base_location.map(|(chunk, _, _)| chunk)
        } else {
            None
        };

        let mut count = 0;
        for entity in entities {
            let live = self.reverse.version(entity.index) == entity.version;
            let location = self.reverse.location(entity.index);
            if live {
                let chunk = location.map(|(chunk, _, _)| chunk);
                if chunk != base_chunk {
                    break;
                }
            } else if location.is_none() {
                // Already destroyed: extends a None-chunk (no-op) range.
            } else {
                break;
            }
            count += 1;
        }

        match base_chunk {
            Some(chunk) => {
                let (_, chunk_base_index, _) = base_location.unwrap();
                EntityRange {
                    chunk: Some(chunk),
                    chunk_base_index,
                    count,
                }
            }
            None => EntityRange {
                chunk: None,
                chunk_base_index: 0,
                count,
            },
        }
    }

    /// Destroys every entity in `entities`, silently skipping handles that
    /// are already destroyed or stale. Live rows are erased via
    /// `drop_in_place` and compacted with a swap-from-the-end so every
    /// archetype's chunks stay dense over `[0, entity_count)`.
    pub(crate) fn destroy_entities(&mut self, registry: &TypeRegistry, entities: &[Entity]) {
        let mut i = 0;
        while i < entities.len() {
            let range = self.find_first_entity_range(&entities[i..]);
            let step = range.count.max(1);

            if let Some(chunk) = range.chunk {
                let archetype_id = unsafe { chunk.header().archetype };
                let base = range.chunk_base_index;
                let capacity = self.archetypes[archetype_id.index()].chunk_entity_capacity() as i32;
                let mut len = unsafe { chunk.header().entity_count };
                let was_full = len == capacity;

                let entity_ptr = chunk.payload_ptr() as *const Entity;
                let targets: Vec<Entity> = (0..range.count)
                    .map(|k| unsafe { *entity_ptr.add((base + k) as usize) })
                    .collect();

                for &target in targets.iter().rev() {
                    let (_, remove_index, _) = self
                        .reverse
                        .location(target.index)
                        .expect("entity in destroy range has no chunk location");
                    let last_index = len - 1;
                    let archetype = &self.archetypes[archetype_id.index()];
                    unsafe { destroy_row(registry, archetype, chunk, last_index, remove_index) };
                    if remove_index != last_index {
                        let moved = unsafe { *entity_ptr.add(last_index as usize) };
                        self.reverse.relocate(moved.index, remove_index);
                    }
                    self.reverse.free_index(target.index);
                    len -= 1;
                }

                unsafe {
                    chunk.header_mut().entity_count = len;
                }
                let archetype = &mut self.archetypes[archetype_id.index()];
                let list_index = unsafe { chunk.header().list_index } as usize;
                archetype.set_entity_count_at(list_index, len);
                archetype.entity_count -= range.count as u32;
                if was_full && len < capacity {
                    archetype.push_free_list(list_index);
                }
            }

            i += step as usize;
        }
        self.entity_create_destroy_version = self.entity_create_destroy_version.wrapping_add(1);
    }

    /// Interns `desc`, matching it against every existing archetype on a
    /// cache miss so its `matching_archetypes` list starts complete.
    pub(crate) fn create_query(&mut self, desc: Vec<QueryTerm>) -> QueryId {
        let (mut candidate, hash) = query::prepare_query(desc);
        if let Some(existing) = self.query_map.find(hash, &self.queries, &candidate) {
            log::trace!("query {:?}: cache hit", existing);
            return existing;
        }
        assert!(
            self.queries.len() < MAX_QUERY_COUNT,
            "query interning table exhausted: already at {} live queries",
            MAX_QUERY_COUNT
        );
        let id = QueryId::new(self.queries.len() as u32);
        query::assign_id(&mut candidate, id);
        for archetype in &mut self.archetypes {
            if candidate.is_match(archetype) {
                candidate.matching_archetypes.push(archetype.id);
                archetype.matching_queries.push(id);
            }
        }
        log::debug!(
            "query {:?}: created, matching {} archetype(s) so far",
            id,
            candidate.matching_archetypes.len()
        );
        self.queries.push(Box::new(candidate));
        self.query_map.insert(hash, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::TypeInfo;

    fn registry_with(component_count: usize) -> TypeRegistry {
        let mut types = vec![crate::component::entity_type_info()];
        for i in 1..=component_count {
            types.push(TypeInfo::of::<u32>(i as u32, "u32"));
        }
        TypeRegistry::initialize(types).unwrap()
    }

    #[test]
    fn creating_then_destroying_recycles_the_index_with_a_bumped_version() {
        let registry = registry_with(1);
        let mut allocator = ChunkAllocator::new();
        let mut manager = EntityManager::new();
        let archetype = manager.create_archetype(&registry, vec![ComponentTypeId(1)]);

        let mut created = [Entity::INVALID; 1];
        manager.create_entities(&mut allocator, archetype, &mut created, 1);
        let first = created[0];
        assert_eq!(first.version, 1);

        manager.destroy_entities(&registry, &created);
        assert!(manager.entity_location(first).is_none());

        let mut recreated = [Entity::INVALID; 1];
        manager.create_entities(&mut allocator, archetype, &mut recreated, 2);
        assert_eq!(recreated[0].index, first.index);
        assert_eq!(recreated[0].version, 2);
    }

    #[test]
    fn destroying_a_middle_entity_swaps_the_last_row_into_its_place() {
        let registry = registry_with(1);
        let mut allocator = ChunkAllocator::new();
        let mut manager = EntityManager::new();
        let archetype = manager.create_archetype(&registry, vec![ComponentTypeId(1)]);

        let mut entities = [Entity::INVALID; 3];
        manager.create_entities(&mut allocator, archetype, &mut entities, 1);

        manager.destroy_entities(&registry, &entities[1..2]);

        let (chunk, index_in_chunk, _) = manager.entity_location(entities[2]).unwrap();
        assert_eq!(index_in_chunk, 1);
        assert_eq!(unsafe { chunk.header().entity_count }, 2);
        assert!(manager.entity_location(entities[1]).is_none());
    }

    #[test]
    fn destroying_an_already_destroyed_handle_is_a_no_op() {
        let registry = registry_with(1);
        let mut allocator = ChunkAllocator::new();
        let mut manager = EntityManager::new();
        let archetype = manager.create_archetype(&registry, vec![ComponentTypeId(1)]);

        let mut entities = [Entity::INVALID; 2];
        manager.create_entities(&mut allocator, archetype, &mut entities, 1);
        manager.destroy_entities(&registry, &entities[0..1]);
        manager.destroy_entities(&registry, &entities[0..1]);

        assert!(manager.entity_location(entities[1]).is_some());
    }

    #[test]
    fn create_query_matches_archetypes_created_before_and_after_it() {
        let registry = registry_with(2);
        let mut manager = EntityManager::new();
        let before = manager.create_archetype(&registry, vec![ComponentTypeId(1)]);

        let query = manager.create_query(vec![QueryTerm::read(ComponentTypeId(1))]);
        assert_eq!(manager.query(query).matching_archetypes, vec![before]);

        let after = manager.create_archetype(&registry, vec![ComponentTypeId(1), ComponentTypeId(2)]);
        assert!(manager.query(query).matching_archetypes.contains(&after));

        let query_again = manager.create_query(vec![QueryTerm::read(ComponentTypeId(1))]);
        assert_eq!(query_again, query);
    }
}
