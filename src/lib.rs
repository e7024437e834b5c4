//!
//! Archetype-based entity-component-system storage and query engine.
//!

mod archetype;
mod chunk;
mod component;
mod entity;
pub mod job;
mod query;
mod util;
mod world;

pub use self::{
    archetype::{Archetype, ArchetypeId},
    chunk::ChunkAllocator,
    component::{
        entity_type_info, AccessMode, ComponentTypeId, Entity, TypeInfo, TypeRegistry, TypeRegistryError,
    },
    entity::EntityManager,
    query::{EntityQuery, QueryId, QueryTerm},
    util::ScratchArena,
    world::{System, SystemState, World},
};
