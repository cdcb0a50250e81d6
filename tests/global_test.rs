//! Test coverage of [`LockedHeap`] as a [`GlobalAlloc`].

use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::NonNull,
};

use kheap::{
    BumpFrameSource, Heap, HeapConfig, LockedHeap, PAGE_SIZE, PAYLOAD_ALIGN, PagedRegion,
    PhysicalAddress, VirtAddr, paging::PageTable,
};

const WINDOW_PAGES: usize = 8;

#[repr(C, align(4096))]
struct Page([u8; PAGE_SIZE]);

fn with_locked_heap<R>(
    install: bool,
    test: impl FnOnce(&LockedHeap<PagedRegion<'_>, BumpFrameSource>) -> R,
) -> R {
    let mut memory: Vec<Page> = (0..WINDOW_PAGES).map(|_| Page([0; PAGE_SIZE])).collect();
    let mut table = Box::new(PageTable::new());
    let base = NonNull::new(memory.as_mut_ptr().cast::<u8>()).expect("Vec pointers are non-null");
    // SAFETY:
    // `memory` backs the whole window, isn't touched otherwise, and outlives the region.
    let mut region = unsafe { PagedRegion::new(&mut table, base, WINDOW_PAGES) };
    let mut frames = BumpFrameSource::new(
        PhysicalAddress(0x8000_0000),
        PhysicalAddress(0x8000_0000 + WINDOW_PAGES * PAGE_SIZE),
    );
    let start = region.base();
    let config = HeapConfig::new(start, VirtAddr(start.0 + PAGE_SIZE));
    region
        .map_initial(&mut frames, config.end, config.flags)
        .expect("Initial mapping should succeed");

    let locked = LockedHeap::empty();
    if install {
        assert!(locked.init(Heap::new(region, frames, config)).is_ok());
    }
    test(&locked)
}

#[test]
fn test_alloc_and_dealloc() {
    with_locked_heap(true, |heap| {
        let layout = Layout::new::<[u64; 4]>();
        // SAFETY:
        // The layout isn't zero-sized.
        let ptr = unsafe { heap.alloc(layout) }.cast::<[u64; 4]>();
        assert!(!ptr.is_null());
        assert!(ptr.is_aligned());
        // SAFETY:
        // The allocation is live and fits the value.
        unsafe {
            ptr.write([1, 2, 3, 4]);
            assert_eq!(ptr.read(), [1, 2, 3, 4]);
        }
        let stats = heap.check().expect("Heap is installed").expect("Heap should be consistent");
        assert_eq!(stats.used_blocks, 1);
        assert_eq!(stats.used_bytes, 32);

        // SAFETY:
        // `ptr` came from `alloc` with this layout and isn't used again.
        unsafe { heap.dealloc(ptr.cast(), layout) };
        let stats = heap.check().expect("Heap is installed").expect("Heap should be consistent");
        assert_eq!(stats.used_blocks, 0);
    });
}

#[test]
fn test_odd_sizes_stay_aligned() {
    with_locked_heap(true, |heap| {
        let mut live = Vec::new();
        for size in [1, 3, 7, 13, 100, 4000, 5, 9000] {
            let layout = Layout::from_size_align(size, 1).expect("Valid layout");
            // SAFETY:
            // The layout isn't zero-sized.
            let ptr = unsafe { heap.alloc(layout) };
            assert!(!ptr.is_null(), "Allocating {size} bytes failed");
            assert!(ptr.addr().is_multiple_of(PAYLOAD_ALIGN));
            live.push((ptr, layout));
        }
        for (ptr, layout) in live {
            // SAFETY:
            // Each pointer came from `alloc` with this layout and is freed once.
            unsafe { heap.dealloc(ptr, layout) };
        }
        heap.check().expect("Heap is installed").expect("Heap should be consistent");
    });
}

#[test]
fn test_overaligned_layout_is_refused() {
    with_locked_heap(true, |heap| {
        let layout = Layout::from_size_align(64, 64).expect("Valid layout");
        // SAFETY:
        // The layout isn't zero-sized.
        assert!(unsafe { heap.alloc(layout) }.is_null());
    });
}

#[test]
fn test_exhaustion_returns_null() {
    with_locked_heap(true, |heap| {
        let layout = Layout::from_size_align(WINDOW_PAGES * PAGE_SIZE, 8).expect("Valid layout");
        // SAFETY:
        // The layout isn't zero-sized.
        assert!(unsafe { heap.alloc(layout) }.is_null());
        heap.check().expect("Heap is installed").expect("Heap should be consistent");
    });
}

#[test]
fn test_uninitialized_heap() {
    with_locked_heap(false, |heap| {
        // SAFETY:
        // The layout isn't zero-sized.
        assert!(unsafe { heap.alloc(Layout::new::<u64>()) }.is_null());
        assert!(heap.check().is_none());
        assert!(heap.with_heap(|heap| heap.end()).is_none());
    });
}

#[test]
fn test_install_only_once() {
    let mut tables = [PageTable::new(), PageTable::new()];
    let mut memory = [Page([0; PAGE_SIZE]), Page([0; PAGE_SIZE])];
    let [first_table, second_table] = &mut tables;
    let [first_page, second_page] = &mut memory;
    let make_heap = |table, page: &mut Page, frame| {
        let base = NonNull::from(page).cast::<u8>();
        // SAFETY:
        // `page` backs the one-page window and outlives the region.
        let mut region = unsafe { PagedRegion::new(table, base, 1) };
        let mut frames =
            BumpFrameSource::new(PhysicalAddress(frame), PhysicalAddress(frame + PAGE_SIZE));
        let config = HeapConfig::new(region.base(), region.limit());
        region
            .map_initial(&mut frames, config.end, config.flags)
            .expect("Initial mapping should succeed");
        Heap::new(region, frames, config)
    };
    let first = make_heap(first_table, first_page, 0x9000_0000);
    let second = make_heap(second_table, second_page, 0x9000_1000);
    let start = first.start();

    let locked = LockedHeap::empty();
    assert!(locked.init(first).is_ok());
    assert!(locked.init(second).is_err(), "A heap is already installed");
    assert_eq!(locked.with_heap(|heap| heap.start()), Some(start));
}

#[test]
fn test_reentrant_alloc_gets_null() {
    with_locked_heap(true, |locked| {
        let layout = Layout::new::<u64>();
        let inner = locked.with_heap(|_| {
            // SAFETY:
            // The layout isn't zero-sized.
            unsafe { locked.alloc(layout) }
        });
        assert_eq!(inner, Some(std::ptr::null_mut()), "The heap is busy with the outer call");

        // SAFETY:
        // The layout isn't zero-sized.
        let ptr = unsafe { locked.alloc(layout) };
        assert!(!ptr.is_null(), "The lock is free again");
        // SAFETY:
        // `ptr` came from `alloc` with this layout and isn't used again.
        unsafe { locked.dealloc(ptr, layout) };
    });
}

#[test]
#[should_panic(expected = "re-entered the heap")]
fn test_reentrant_dealloc_halts() {
    with_locked_heap(true, |locked| {
        let layout = Layout::new::<u64>();
        // SAFETY:
        // The layout isn't zero-sized.
        let ptr = unsafe { locked.alloc(layout) };
        assert!(!ptr.is_null());
        locked.with_heap(|_| {
            // SAFETY:
            // `ptr` came from `alloc` with this layout and isn't used again.
            unsafe { locked.dealloc(ptr, layout) };
        });
    });
}
