//! The heap as the global allocator.
//!
//! See [`LockedHeap`] for details.

use core::alloc::{GlobalAlloc, Layout};

use crate::{
    diag::halt,
    error::Result,
    heap::{Heap, HeapStats},
    paging::{AddressSpace, FrameSource, VirtAddr},
    sync::KSpinLock,
};

/// The alignment every payload handed out through [`GlobalAlloc`] has.
pub const PAYLOAD_ALIGN: usize = 8;

/// A [`Heap`] behind one global lock.
///
/// Finding a fit, splitting, and growing touch the same list and heap end, so the lock is held
/// for the whole of each allocation and release.
///
/// Through [`GlobalAlloc`], every request is rounded up to a multiple of [`PAYLOAD_ALIGN`], which
/// keeps every header and payload 8-aligned. Layouts asking for more alignment than that get a
/// null pointer.
///
/// The heap is only ever entered from one execution context at a time (a single hart, or with
/// interrupts off), so a lock that is already held when [`GlobalAlloc`] is entered means the heap
/// has re-entered itself, typically through a log sink that allocates. Such an allocation gets a
/// null pointer instead of spinning forever, and such a free halts.
///
/// ```ignore
/// #[global_allocator]
/// static HEAP: LockedHeap<PagedRegion<'static>, BumpFrameSource> = LockedHeap::empty();
/// ```
pub struct LockedHeap<A, F> {
    /// The heap, once installed.
    heap: KSpinLock<Option<Heap<A, F>>>,
}
impl<A, F> LockedHeap<A, F> {
    /// A global heap with nothing installed yet.
    ///
    /// Allocations fail until [`Self::init`] runs.
    pub const fn empty() -> Self {
        Self {
            heap: KSpinLock::new(None),
        }
    }
}

impl<A: AddressSpace, F: FrameSource> LockedHeap<A, F> {
    /// Install the heap.
    ///
    /// If a heap is already installed, the given one is handed back in an `Err`. The heap should
    /// be fresh: blocks allocated with sizes that aren't multiples of [`PAYLOAD_ALIGN`] would
    /// misalign everything after them.
    pub fn init(&self, heap: Heap<A, F>) -> Result<(), Heap<A, F>> {
        let mut slot = self.heap.lock();
        if slot.is_some() {
            return Err(heap);
        }
        *slot = Some(heap);
        Ok(())
    }

    /// Run `f` with exclusive access to the installed heap.
    ///
    /// Returns `None` without calling `f` if no heap is installed.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut Heap<A, F>) -> R) -> Option<R> {
        self.heap.lock().as_mut().map(f)
    }

    /// Log every block of the installed heap.
    pub fn dump(&self) {
        if self.with_heap(|heap| heap.dump()).is_none() {
            log::debug!("Heap not initialized");
        }
    }

    /// Verify the installed heap, see [`Heap::check`].
    pub fn check(&self) -> Option<Result<HeapStats>> {
        self.with_heap(|heap| heap.check())
    }
}

impl<A, F> Default for LockedHeap<A, F> {
    fn default() -> Self {
        Self::empty()
    }
}

// SAFETY:
// Payloads come from a heap that never hands out overlapping blocks and never unmaps memory, and
// oversized alignments are refused. A halt inside `dealloc` must not unwind out of the allocator:
// builds installing this as the global allocator have to use `panic = "abort"`, as the kernel
// profiles do.
unsafe impl<A: AddressSpace + Send, F: FrameSource + Send> GlobalAlloc for LockedHeap<A, F> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAYLOAD_ALIGN {
            log::error!("Heap can't align to {} bytes", layout.align());
            return core::ptr::null_mut();
        }
        let size = layout.size().max(1).next_multiple_of(PAYLOAD_ALIGN);
        let Some(mut heap) = self.heap.try_lock() else {
            return core::ptr::null_mut();
        };
        let Some(heap) = heap.as_mut() else {
            log::error!("Allocation of {size} bytes before the heap was initialized");
            return core::ptr::null_mut();
        };
        match heap.try_allocate(size) {
            Ok(payload) => {
                debug_assert!(payload.is_aligned(PAYLOAD_ALIGN));
                core::ptr::with_exposed_provenance_mut(payload.0)
            }
            Err(err) => {
                log::error!("Allocation of {size} bytes failed: {err}");
                core::ptr::null_mut()
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(mut heap) = self.heap.try_lock() else {
            halt!("free({ptr:p}) re-entered the heap");
        };
        let Some(heap) = heap.as_mut() else {
            halt!("free({ptr:p}) before the heap was initialized");
        };
        heap.release(VirtAddr(ptr.expose_provenance()));
    }
}
