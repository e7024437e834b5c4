use crate::archetype::{Archetype, ArchetypeId};
use crate::chunk::ChunkPtr;
use crate::component::ComponentTypeId;
use crate::entity::EntityManager;
use crate::query::QueryId;

/// A contiguous run of rows within one chunk, handed to a job kernel.
/// Today the job runner always visits a whole chunk (`batch_begin == 0`,
/// `batch_end == entity_count`); the split exists so a future scheduler
/// can sub-divide a chunk across workers without changing this type.
pub struct SystemChunk {
    chunk: ChunkPtr,
    pub batch_begin: i32,
    pub batch_end: i32,
}

impl SystemChunk {
    pub fn len(&self) -> usize {
        (self.batch_end - self.batch_begin) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.batch_begin == self.batch_end
    }

    /// Resolves a read-only column for `component` over this batch.
    /// `None` means `archetype` does not carry the component; only a
    /// `ReadAny`-style caller should treat that as anything but a bug.
    pub fn read<'a, T: 'static>(&self, archetype: &'a Archetype, component: ComponentTypeId) -> Option<&'a [T]> {
        let col = archetype.index_of(component)?;
        let offset = archetype.offsets[col] as usize;
        debug_assert_eq!(archetype.sizes[col] as usize, core::mem::size_of::<T>());
        let base = unsafe { self.chunk.payload_ptr().add(offset) as *const T };
        Some(unsafe { core::slice::from_raw_parts(base.add(self.batch_begin as usize), self.len()) })
    }

    /// Resolves a read-write column for `component` over this batch. The
    /// chunk's change-version row for this component was already stamped
    /// by `execute_job` before the kernel runs.
    pub fn write<'a, T: 'static>(&self, archetype: &'a Archetype, component: ComponentTypeId) -> Option<&'a mut [T]> {
        let col = archetype.index_of(component)?;
        let offset = archetype.offsets[col] as usize;
        debug_assert_eq!(archetype.sizes[col] as usize, core::mem::size_of::<T>());
        let base = unsafe { self.chunk.payload_ptr().add(offset) as *mut T };
        Some(unsafe { core::slice::from_raw_parts_mut(base.add(self.batch_begin as usize), self.len()) })
    }
}

/// Visits every chunk of every archetype currently matching `query`, in
/// archetype-list order then chunk-list order. Before each chunk is handed
/// to `kernel`, the change-version row of every `ReadWrite` component the
/// query declares is stamped with `global_version` — matching handles are
/// assumed written regardless of whether the kernel body actually touches
/// them this visit.
pub fn execute_job<F>(manager: &mut EntityManager, query: QueryId, global_version: u32, mut kernel: F)
where
    F: FnMut(&SystemChunk, &Archetype),
{
    let write_ids: Vec<ComponentTypeId> = manager.query(query).write_ids().collect();
    let archetype_ids: Vec<ArchetypeId> = manager.query(query).matching_archetypes.clone();

    for archetype_id in archetype_ids {
        let chunk_count = manager.archetype(archetype_id).chunk_count();
        for list_index in 0..chunk_count {
            {
                let archetype = manager.archetype_mut(archetype_id);
                for &component in &write_ids {
                    if let Some(col) = archetype.index_of(component) {
                        archetype.stamp_change_version(col, list_index, global_version);
                    }
                }
            }

            let archetype = manager.archetype(archetype_id);
            let chunk = archetype.chunk(list_index);
            let entity_count = archetype.entity_count_at(list_index);
            let system_chunk = SystemChunk {
                chunk,
                batch_begin: 0,
                batch_end: entity_count,
            };
            kernel(&system_chunk, archetype);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkAllocator;
    use crate::component::{ComponentTypeId, Entity, TypeInfo, TypeRegistry};
    use crate::query::QueryTerm;

    #[test]
    fn write_stamps_change_version_and_read_sees_written_values() {
        let types = vec![
            crate::component::entity_type_info(),
            TypeInfo::of::<u32>(1, "Position"),
        ];
        let registry = TypeRegistry::initialize(types).unwrap();
        let mut allocator = ChunkAllocator::new();
        let mut manager = EntityManager::new();
        let archetype = manager.create_archetype(&registry, vec![ComponentTypeId(1)]);

        let mut entities = [Entity::INVALID; 4];
        manager.create_entities(&mut allocator, archetype, &mut entities, 1);

        let query = manager.create_query(vec![QueryTerm::write(ComponentTypeId(1))]);

        execute_job(&mut manager, query, 7, |chunk, archetype| {
            let position = chunk.write::<u32>(archetype, ComponentTypeId(1)).unwrap();
            for (i, slot) in position.iter_mut().enumerate() {
                *slot = i as u32 * 10;
            }
        });

        assert_eq!(manager.archetype(archetype).change_version(1, 0), 7);

        execute_job(&mut manager, query, 8, |chunk, archetype| {
            let position = chunk.read::<u32>(archetype, ComponentTypeId(1)).unwrap();
            assert_eq!(position, &[0, 10, 20, 30]);
        });
    }
}
