//! The kernel's dynamic memory.
//!
//! [`Heap`] is an explicit free-list allocator over one contiguous virtual region. When no free
//! block is large enough it maps another page at the end of the region and tries again. It never
//! touches page tables itself; it goes through an [`AddressSpace`] for mappings and a
//! [`FrameSource`] for physical memory, so it runs the same against [`PagedRegion`] in the kernel
//! and against anything else that implements those traits.
//!
//! Typical kernel setup:
//!
//! ```ignore
//! let config = HeapConfig::kernel();
//! let mut frames = BumpFrameSource::new(free_ram_start, free_ram_end);
//! let mut region = unsafe { PagedRegion::new(heap_table, heap_base, PAGE_TABLE_LENGTH) };
//! region.map_initial(&mut frames, config.end, config.flags)?;
//! HEAP.init(Heap::new(region, frames, config));
//! ```

#![cfg_attr(not(test), no_std)]

mod arch;
pub mod block;
mod config;
mod diag;
mod error;
mod frame;
mod global;
mod heap;
pub mod logger;
pub mod paging;
mod region;
pub mod sync;

pub use arch::flush_tlb_all;
pub use config::{HeapConfig, INITIAL_HEAP_SIZE, KERNEL_HEAP_START, MAX_GROWS};
pub use error::{Exhaustion, HeapError, OutOfMemory, Result};
pub use frame::BumpFrameSource;
pub use global::{LockedHeap, PAYLOAD_ALIGN};
pub use heap::{GROWTH_INCREMENT, Heap, HeapStats};
pub use paging::{AddressSpace, FrameSource, PAGE_SIZE, PageFlags, PhysicalAddress, VirtAddr};
pub use region::PagedRegion;
