use core::fmt;
use core::ptr::drop_in_place;

/// Stable, globally unique index into a `World`'s type registry. Identity
/// `0` is reserved for the built-in `Entity` component, which is implicitly
/// present in every archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeId(pub u32);

impl ComponentTypeId {
    pub const ENTITY: ComponentTypeId = ComponentTypeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// Versioned handle to a row across an archetype's component columns.
/// `index` addresses the entity manager's reverse map; `version` is bumped
/// every time the slot at `index` is recycled, invalidating stale copies
/// of this handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct Entity {
    pub index: i32,
    pub version: u32,
}

impl Entity {
    pub(crate) const INVALID: Entity = Entity {
        index: -1,
        version: 0,
    };
}

unsafe fn erased_drop_in_place<T>(ptr: *mut u8) {
    drop_in_place(ptr as *mut T)
}

/// `{ size, alignment, name }` for a registered component type, installed
/// once per `World` and immutable for its lifetime. Carries an erased
/// destructor so chunk teardown can run `Drop` for component types that
/// need it.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    pub id: ComponentTypeId,
    pub size_bytes: u16,
    pub alignment_bytes: u16,
    pub name: &'static str,
    pub(crate) drop_in_place: unsafe fn(*mut u8),
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("id", &self.id)
            .field("size_bytes", &self.size_bytes)
            .field("alignment_bytes", &self.alignment_bytes)
            .field("name", &self.name)
            .finish()
    }
}

impl TypeInfo {
    pub fn of<T: 'static>(id: u32, name: &'static str) -> Self {
        assert!(
            core::mem::size_of::<T>() <= u16::MAX as usize,
            "component `{}` is larger than a chunk column can address",
            name
        );
        TypeInfo {
            id: ComponentTypeId(id),
            size_bytes: core::mem::size_of::<T>() as u16,
            alignment_bytes: core::mem::align_of::<T>() as u16,
            name,
            drop_in_place: erased_drop_in_place::<T>,
        }
    }
}

/// Built-in descriptor for the `Entity` component itself; always occupies
/// registry slot 0.
pub fn entity_type_info() -> TypeInfo {
    TypeInfo::of::<Entity>(0, "Entity")
}

/// Error raised when a caller-supplied `TypeInfo` list violates the
/// registry's preconditions. Always fatal to `World::create`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRegistryError {
    MissingEntityAtZero,
    IdOutOfOrder { expected: u32, found: u32 },
}

impl fmt::Display for TypeRegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRegistryError::MissingEntityAtZero => {
                write!(f, "type registry: list[0] must be the Entity type at id 0")
            }
            TypeRegistryError::IdOutOfOrder { expected, found } => write!(
                f,
                "type registry: expected id {} at that position, found {}",
                expected, found
            ),
        }
    }
}

/// Immutable, World-owned map from `ComponentTypeId` to `TypeInfo`.
pub struct TypeRegistry {
    types: Box<[TypeInfo]>,
}

impl TypeRegistry {
    /// Installs `types`. `types[0]` must describe `Entity` at id 0 and
    /// `types[i].id` must equal `i` for every `i`; violating either is a
    /// misconfiguration and is fatal.
    pub fn initialize(types: Vec<TypeInfo>) -> Result<Self, TypeRegistryError> {
        match types.first() {
            Some(first) if first.id == ComponentTypeId::ENTITY => {}
            _ => return Err(TypeRegistryError::MissingEntityAtZero),
        }
        for (i, info) in types.iter().enumerate() {
            if info.id.0 != i as u32 {
                return Err(TypeRegistryError::IdOutOfOrder {
                    expected: i as u32,
                    found: info.id.0,
                });
            }
        }
        Ok(TypeRegistry {
            types: types.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, id: ComponentTypeId) -> &TypeInfo {
        &self.types[id.index()]
    }

    pub(crate) fn contains(&self, id: ComponentTypeId) -> bool {
        id.index() < self.types.len()
    }
}

/// Access-mode annotation a query or job kernel attaches to a component id.
/// Today these are advisory metadata only: the job runner always visits one
/// chunk at a time with exclusive logical access, and no scheduler checks
/// for write/write or read/write conflicts between systems yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    /// Present in `Any`: the column may or may not exist on a matching
    /// archetype; accessors must null-check.
    Any,
    /// Present in `None`: the archetype must *not* carry this component.
    Exclude,
}
