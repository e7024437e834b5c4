use crate::archetype::{Archetype, ArchetypeId};
use crate::chunk::ChunkAllocator;
use crate::component::{ComponentTypeId, Entity, TypeInfo, TypeRegistry, TypeRegistryError};
use crate::entity::EntityManager;
use crate::query::{EntityQuery, QueryId, QueryTerm};
use crate::util::ScratchArena;

const CREATED: u32 = 1 << 0;
const RUNNING: u32 = 1 << 1;
const DESTROYED: u32 = 1 << 2;

/// Borrowed handle to everything a `System` hook needs for one call.
/// Built fresh by `World::update`/`World::destroy` for each invocation
/// rather than stored on the system, since a system can't hold a
/// back-reference to the `World` that owns it.
pub struct SystemState<'a> {
    pub entity_manager: &'a mut EntityManager,
    pub chunk_allocator: &'a mut ChunkAllocator,
    pub registry: &'a TypeRegistry,
    pub scratch: &'a ScratchArena,
    pub global_version: u32,
    pub dt: f32,
}

/// A unit of per-frame work. `on_create` runs once, the first time the
/// system is visited by `update`; `on_update` runs on every subsequent
/// visit; `on_destroy` runs once from `World::destroy`. Default bodies are
/// no-ops so a system only needs to implement the hooks it uses.
pub trait System {
    fn on_create(&mut self, _state: &mut SystemState) {}
    fn on_update(&mut self, _state: &mut SystemState) {}
    fn on_destroy(&mut self, _state: &mut SystemState) {}
}

/// Container for every archetype, chunk, entity and query a program has
/// created, plus the registered systems driven by `update`. The sole
/// owner of all of it: archetypes, chunks and queries hold only
/// non-owning back-references (ids, not pointers) to each other.
pub struct World {
    registry: TypeRegistry,
    chunk_allocator: ChunkAllocator,
    entities: EntityManager,
    scratch: ScratchArena,
    systems: Vec<(Box<dyn System>, u32)>,
    global_version: u32,
}

impl World {
    /// Installs `types` as the type registry and returns an empty world.
    /// `types[0]` must describe `Entity` at id 0 and `types[i].id` must
    /// equal `i`; see `TypeRegistry::initialize`.
    pub fn new(types: Vec<TypeInfo>) -> Result<Self, TypeRegistryError> {
        let registry = TypeRegistry::initialize(types)?;
        Ok(World {
            registry,
            chunk_allocator: ChunkAllocator::new(),
            entities: EntityManager::new(),
            scratch: ScratchArena::new(),
            systems: Vec::new(),
            global_version: 0,
        })
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn global_version(&self) -> u32 {
        self.global_version
    }

    pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
        self.entities.archetype(id)
    }

    pub fn query(&self, id: QueryId) -> &EntityQuery {
        self.entities.query(id)
    }

    /// Interns the archetype for `ids` (order-insensitive, `Entity` is
    /// implicit) and returns its id.
    pub fn create_archetype(&mut self, ids: Vec<ComponentTypeId>) -> ArchetypeId {
        self.entities.create_archetype(&self.registry, ids)
    }

    pub fn create_entity(&mut self, archetype: ArchetypeId) -> Entity {
        let mut out = [Entity::INVALID];
        self.create_entities(archetype, &mut out);
        out[0]
    }

    pub fn create_entities(&mut self, archetype: ArchetypeId, out: &mut [Entity]) {
        self.entities
            .create_entities(&mut self.chunk_allocator, archetype, out, self.global_version);
    }

    pub fn destroy_entity(&mut self, entity: Entity) {
        self.destroy_entities(&[entity]);
    }

    pub fn destroy_entities(&mut self, entities: &[Entity]) {
        if entities.is_empty() {
            return;
        }
        self.entities.destroy_entities(&self.registry, entities);
    }

    /// Interns the query for `desc` (order-insensitive) and returns its id.
    pub fn create_query(&mut self, desc: Vec<QueryTerm>) -> QueryId {
        self.entities.create_query(desc)
    }

    /// Visits every matching chunk of `query`'s cached archetype list,
    /// stamping write-mode change versions before `kernel` runs. A thin
    /// wrapper over `job::execute_job` so callers don't need to import the
    /// module separately.
    pub fn run_query<F>(&mut self, query: QueryId, kernel: F)
    where
        F: FnMut(&crate::job::SystemChunk, &Archetype),
    {
        crate::job::execute_job(&mut self.entities, query, self.global_version, kernel);
    }

    /// Appends `system`, initializing its lifecycle flags to zero. Its
    /// `on_create` runs on the next call to `update`.
    pub fn register(&mut self, system: Box<dyn System>) {
        self.systems.push((system, 0));
    }

    /// Visits every registered system in registration order: a
    /// not-yet-created system receives `on_create` then `on_update` in the
    /// same visit; an already-running system receives only `on_update`.
    /// The scratch arena is reset after each system so references it
    /// handed out don't survive into the next one.
    pub fn update(&mut self, dt: f32) {
        self.global_version = self.global_version.wrapping_add(1);
        let mut systems = core::mem::take(&mut self.systems);
        for (system, flags) in systems.iter_mut() {
            {
                let mut state = SystemState {
                    entity_manager: &mut self.entities,
                    chunk_allocator: &mut self.chunk_allocator,
                    registry: &self.registry,
                    scratch: &self.scratch,
                    global_version: self.global_version,
                    dt,
                };
                if *flags & (CREATED | DESTROYED) == 0 {
                    system.on_create(&mut state);
                    *flags |= CREATED | RUNNING;
                }
                if *flags & RUNNING != 0 {
                    system.on_update(&mut state);
                }
            }
            self.scratch.reset();
        }
        self.systems = systems;
    }

    /// Runs `on_destroy` on every system that reached `on_create` and
    /// hasn't already been destroyed, then drops the world, tearing down
    /// the entity manager, chunk allocator and type registry in
    /// declaration order.
    pub fn destroy(mut self) {
        let mut systems = core::mem::take(&mut self.systems);
        for (system, flags) in systems.iter_mut() {
            if *flags & CREATED != 0 && *flags & DESTROYED == 0 {
                let mut state = SystemState {
                    entity_manager: &mut self.entities,
                    chunk_allocator: &mut self.chunk_allocator,
                    registry: &self.registry,
                    scratch: &self.scratch,
                    global_version: self.global_version,
                    dt: 0.0,
                };
                system.on_destroy(&mut state);
                *flags |= DESTROYED;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use std::rc::Rc;

    fn test_world() -> World {
        World::new(vec![
            crate::component::entity_type_info(),
            TypeInfo::of::<u32>(1, "Position"),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_a_registry_missing_entity_at_zero() {
        let err = World::new(vec![TypeInfo::of::<u32>(1, "Position")]).unwrap_err();
        assert_eq!(err, TypeRegistryError::MissingEntityAtZero);
    }

    #[test]
    fn create_entity_round_trips_through_create_archetype() {
        let mut world = test_world();
        let archetype = world.create_archetype(vec![ComponentTypeId(1)]);
        let entity = world.create_entity(archetype);
        assert_eq!(entity.index, 0);
        assert_eq!(entity.version, 1);
        assert_eq!(world.archetype(archetype).entity_count, 1);
    }

    struct CountingSystem {
        created: Rc<Cell<u32>>,
        updated: Rc<Cell<u32>>,
        destroyed: Rc<Cell<u32>>,
    }

    impl System for CountingSystem {
        fn on_create(&mut self, _state: &mut SystemState) {
            self.created.set(self.created.get() + 1);
        }
        fn on_update(&mut self, _state: &mut SystemState) {
            self.updated.set(self.updated.get() + 1);
        }
        fn on_destroy(&mut self, _state: &mut SystemState) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    #[test]
    fn update_creates_once_then_updates_every_call_and_destroy_runs_once() {
        let mut world = test_world();
        let created = Rc::new(Cell::new(0));
        let updated = Rc::new(Cell::new(0));
        let destroyed = Rc::new(Cell::new(0));
        world.register(Box::new(CountingSystem {
            created: created.clone(),
            updated: updated.clone(),
            destroyed: destroyed.clone(),
        }));

        world.update(1.0 / 60.0);
        world.update(1.0 / 60.0);
        world.update(1.0 / 60.0);

        assert_eq!(created.get(), 1);
        assert_eq!(updated.get(), 3);
        assert_eq!(world.systems[0].1, CREATED | RUNNING);

        world.destroy();
        assert_eq!(destroyed.get(), 1);
    }
}
