//! Heap configuration.

use crate::paging::{PAGE_SIZE, PAGE_TABLE_LENGTH, PageFlags, VirtAddr};

/// Where the kernel heap starts in the kernel's virtual layout.
pub const KERNEL_HEAP_START: VirtAddr = VirtAddr(0x4000_0000);

/// How much of the kernel heap is mapped before the first allocation.
pub const INITIAL_HEAP_SIZE: usize = PAGE_SIZE;

/// The default bound on grow-and-retry cycles for one allocation.
///
/// One page table's worth of pages.
pub const MAX_GROWS: usize = PAGE_TABLE_LENGTH;

/// How a heap is laid out and grown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// The first byte of the heap region.
    pub start: VirtAddr,
    /// One past the last byte of the initially mapped region.
    pub end: VirtAddr,
    /// The flags every page the heap grows into is mapped with.
    pub flags: PageFlags,
    /// How many times one allocation may grow the heap before giving up.
    pub max_grows: usize,
}
impl HeapConfig {
    /// A supervisor-only heap over the already-mapped region `[start, end)`.
    pub const fn new(start: VirtAddr, end: VirtAddr) -> Self {
        Self {
            start,
            end,
            flags: PageFlags::PRESENT.bit_or(PageFlags::WRITABLE),
            max_grows: MAX_GROWS,
        }
    }

    /// The kernel heap at its fixed place in the virtual layout.
    pub const fn kernel() -> Self {
        Self::new(
            KERNEL_HEAP_START,
            VirtAddr(KERNEL_HEAP_START.0 + INITIAL_HEAP_SIZE),
        )
    }

    /// Choose whether user mode may access pages the heap grows into.
    pub const fn with_user_access(mut self, user: bool) -> Self {
        self.flags = if user {
            self.flags.bit_or(PageFlags::USER_ACCESSIBLE)
        } else {
            PageFlags::PRESENT.bit_or(PageFlags::WRITABLE)
        };
        self
    }

    /// Bound how many times one allocation may grow the heap.
    pub const fn with_max_grows(mut self, max_grows: usize) -> Self {
        self.max_grows = max_grows;
        self
    }

    /// The number of bytes initially mapped.
    pub const fn initial_size(&self) -> usize {
        self.end.0 - self.start.0
    }
}
impl Default for HeapConfig {
    fn default() -> Self {
        Self::kernel()
    }
}
