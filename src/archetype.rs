use crate::chunk::{ChunkPtr, CHUNK_BUFFER_SIZE};
use crate::component::{ComponentTypeId, Entity};
use crate::query::QueryId;
use crate::util::HashIndex;

/// Index into the `World`'s archetype list. A non-owning back-reference;
/// the `EntityManager` is the sole owner of every `Archetype`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) / align * align
}

/// Derives `chunk_entity_capacity` and per-component byte offsets from a
/// sorted component size list. `sizes[0]` is always `Entity`'s size.
pub(crate) fn compute_layout(sizes: &[u16]) -> (u32, Vec<u32>) {
    let total: u32 = sizes.iter().map(|&s| s as u32).sum();
    assert!(total > 0, "archetype layout infeasible: zero total component size");

    let max_capacity = (CHUNK_BUFFER_SIZE / core::mem::size_of::<Entity>()) as u32;
    let mut capacity = (CHUNK_BUFFER_SIZE as u32 / total).max(1).min(max_capacity);

    loop {
        let layout_size: u32 = sizes
            .iter()
            .map(|&size| align_up(size as u32 * capacity, 64))
            .sum();
        if layout_size <= CHUNK_BUFFER_SIZE as u32 {
            break;
        }
        capacity -= 1;
        assert!(
            capacity > 0,
            "archetype layout infeasible: component set does not fit in a chunk"
        );
    }

    let mut offsets = Vec::with_capacity(sizes.len());
    let mut offset = 0u32;
    for &size in sizes {
        offsets.push(offset);
        offset += align_up(size as u32 * capacity, 64);
    }
    (capacity, offsets)
}

/// Chunk directory for one archetype: parallel arrays of chunk pointers,
/// per-chunk entity counts, and a per-component × per-chunk change-version
/// matrix (one row per archetype component). The original keeps all three
/// in a single doubling buffer; here each grows independently, which keeps
/// the same logical matrix without a manual stride/buffer-size
/// computation (see DESIGN.md for the tradeoff).
pub(crate) struct ArchetypeChunkData {
    chunk_ptrs: Vec<ChunkPtr>,
    entity_counts: Vec<i32>,
    change_versions: Vec<Vec<u32>>,
}

impl ArchetypeChunkData {
    fn new(component_count: usize) -> Self {
        ArchetypeChunkData {
            chunk_ptrs: Vec::new(),
            entity_counts: Vec::new(),
            change_versions: vec![Vec::new(); component_count],
        }
    }

    fn add(&mut self, chunk: ChunkPtr, change_version: u32) -> usize {
        let list_index = self.chunk_ptrs.len();
        self.chunk_ptrs.push(chunk);
        self.entity_counts.push(0);
        for row in &mut self.change_versions {
            row.push(change_version);
        }
        unsafe {
            chunk.header_mut().list_index = list_index as i32;
        }
        list_index
    }

    fn len(&self) -> usize {
        self.chunk_ptrs.len()
    }
}

/// Canonical description of a sorted set of component identities: the
/// per-chunk layout derived from it, and the list of its chunks plus the
/// free-slot list.
pub struct Archetype {
    pub(crate) id: ArchetypeId,
    pub(crate) types: Box<[ComponentTypeId]>,
    pub(crate) sizes: Box<[u16]>,
    pub(crate) offsets: Box<[u32]>,
    pub(crate) chunk_entity_capacity: u32,
    pub(crate) chunks: ArchetypeChunkData,
    /// `list_index` of every chunk with `entity_count < entity_capacity`.
    pub(crate) free_chunks: Vec<usize>,
    pub entity_count: u32,
    pub(crate) matching_queries: Vec<QueryId>,
}

impl Archetype {
    pub(crate) fn new(id: ArchetypeId, types: Box<[ComponentTypeId]>, sizes: Box<[u16]>) -> Self {
        let (capacity, offsets) = compute_layout(&sizes);
        let component_count = types.len();
        Archetype {
            id,
            types,
            sizes,
            offsets: offsets.into_boxed_slice(),
            chunk_entity_capacity: capacity,
            chunks: ArchetypeChunkData::new(component_count),
            free_chunks: Vec::new(),
            entity_count: 0,
            matching_queries: Vec::new(),
        }
    }

    pub fn component_types(&self) -> &[ComponentTypeId] {
        &self.types
    }

    pub fn chunk_entity_capacity(&self) -> u32 {
        self.chunk_entity_capacity
    }

    /// Linear scan for `id`'s position in this archetype's sorted type
    /// list; `None` means the component is absent (permitted only for
    /// `ReadAny` accessors and `Any` query matches).
    pub(crate) fn index_of(&self, id: ComponentTypeId) -> Option<usize> {
        self.types.iter().position(|&t| t == id)
    }

    pub(crate) fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn chunk(&self, list_index: usize) -> ChunkPtr {
        self.chunks.chunk_ptrs[list_index]
    }

    pub(crate) fn entity_count_at(&self, list_index: usize) -> i32 {
        self.chunks.entity_counts[list_index]
    }

    pub(crate) fn set_entity_count_at(&mut self, list_index: usize, count: i32) {
        self.chunks.entity_counts[list_index] = count;
    }

    pub(crate) fn change_version(&self, component_row: usize, list_index: usize) -> u32 {
        self.chunks.change_versions[component_row][list_index]
    }

    pub(crate) fn stamp_change_version(
        &mut self,
        component_row: usize,
        list_index: usize,
        version: u32,
    ) {
        self.chunks.change_versions[component_row][list_index] = version;
    }

    /// Registers a freshly-allocated chunk in the directory and free-list.
    pub(crate) fn add_chunk(&mut self, chunk: ChunkPtr, change_version: u32) -> usize {
        let list_index = self.chunks.add(chunk, change_version);
        self.free_chunks.push(list_index);
        unsafe {
            chunk.header_mut().free_list_index = (self.free_chunks.len() - 1) as i32;
        }
        list_index
    }

    /// Removes the chunk at `free_list_index` from the free-list by
    /// swap-with-last, fixing up the moved chunk's `free_list_index`.
    pub(crate) fn remove_from_free_list(&mut self, free_list_index: usize) {
        let last = self.free_chunks.len() - 1;
        self.free_chunks.swap(free_list_index, last);
        self.free_chunks.pop();
        if free_list_index < self.free_chunks.len() {
            let moved = self.free_chunks[free_list_index];
            let moved_chunk = self.chunk(moved);
            unsafe {
                moved_chunk.header_mut().free_list_index = free_list_index as i32;
            }
        }
    }

    pub(crate) fn push_free_list(&mut self, list_index: usize) {
        let chunk = self.chunk(list_index);
        self.free_chunks.push(list_index);
        unsafe {
            chunk.header_mut().free_list_index = (self.free_chunks.len() - 1) as i32;
        }
    }
}

/// Interning map from a 32-bit content hash of a canonical id sequence to
/// the archetype that owns it. A thin, typed wrapper over the general
/// hash index: archetypes never compare equal by hash alone, so every
/// lookup re-checks real equality against the candidate's type list.
pub(crate) struct ArchetypeListMap {
    index: HashIndex<ArchetypeId>,
}

impl ArchetypeListMap {
    pub(crate) fn new() -> Self {
        ArchetypeListMap {
            index: HashIndex::new(),
        }
    }

    pub(crate) fn find(
        &self,
        hash: u32,
        archetypes: &[Box<Archetype>],
        canonical: &[ComponentTypeId],
    ) -> Option<ArchetypeId> {
        self.index
            .find(hash, |id| archetypes[id.index()].types.as_ref() == canonical)
            .map(|slot| *self.index.get(slot))
    }

    pub(crate) fn insert(&mut self, hash: u32, id: ArchetypeId) {
        self.index.insert(hash, id);
    }
}
