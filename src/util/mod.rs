mod arena;
mod hash_index;
mod xxhash;

pub use self::arena::ScratchArena;
pub(crate) use self::{hash_index::HashIndex, xxhash::hash_u32_slice};
