use crate::block::BlockPointer;

/// Hands out space at the end of the backing file. Space is never reused,
/// only reclaimed wholesale when the store is cleared, so pointers stay
/// stable for the lifetime of the store.
#[derive(Debug)]
pub(crate) struct AppendAllocator {
    /// Offset the next allocation starts at.
    next: u64,
}

impl AppendAllocator {
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    /// Reserves `len` contiguous bytes and returns where they start.
    pub fn allocate(&mut self, len: u64) -> BlockPointer {
        let pointer = BlockPointer::at(self.next);
        self.next += len;
        pointer
    }

    /// Marks everything before `end` as used, so later allocations never
    /// overlap bytes written outside of `allocate`.
    pub fn reserve_until(&mut self, end: u64) {
        if end > self.next {
            self.next = end;
        }
    }

    pub fn next(&self) -> BlockPointer {
        BlockPointer::at(self.next)
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}
