use bumpalo::Bump;

/// World-scoped bump arena for short-lived allocations made within a
/// frame (per-system scratch buffers built while a job runs). Callers
/// must not retain references across `reset`, which the `World`'s
/// `Update` driver calls between systems.
///
/// Backed by `bumpalo`, which already implements the "chain of blocks,
/// bump a cursor, grab a fresh block when the current one doesn't fit"
/// shape this allocator needs.
pub struct ScratchArena {
    bump: Bump,
}

const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

impl ScratchArena {
    pub(crate) fn new() -> Self {
        ScratchArena {
            bump: Bump::with_capacity(DEFAULT_BLOCK_SIZE),
        }
    }

    /// Copies `value` into the arena and returns a reference scoped to
    /// the next `reset`.
    pub fn alloc<T>(&self, value: T) -> &mut T {
        self.bump.alloc(value)
    }

    /// Copies `data` into the arena as a contiguous slice.
    pub fn alloc_slice_copy<T: Copy>(&self, data: &[T]) -> &mut [T] {
        self.bump.alloc_slice_copy(data)
    }

    /// Resets the cursor to the start of the arena's first block,
    /// invalidating every reference handed out since the last reset.
    /// Called by `World::update` between systems, mirroring the
    /// process-wide temp-allocator reset in the source this was derived
    /// from.
    pub(crate) fn reset(&mut self) {
        self.bump.reset();
    }
}
