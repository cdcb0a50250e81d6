//! Testing the order in which the heap talks to its address space and frame source.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use kheap::{
    AddressSpace, FrameSource, Heap, HeapConfig, INITIAL_HEAP_SIZE, KERNEL_HEAP_START,
    OutOfMemory, PAGE_SIZE, PageFlags, PhysicalAddress, VirtAddr,
    block::HEADER_SIZE,
    paging::MapError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Acquire(PhysicalAddress),
    Map(VirtAddr, PhysicalAddress, PageFlags),
    Invalidate,
}

type Log = Rc<RefCell<Vec<Event>>>;

/// An address space that keeps its mapped pages contiguous in a `Vec`.
struct RecordingSpace {
    base: VirtAddr,
    memory: Vec<u8>,
    log: Log,
    /// The longest range viewed through `memory` or `memory_mut`.
    widest_view: Cell<usize>,
}
impl AddressSpace for RecordingSpace {
    fn map_page(
        &mut self,
        page: VirtAddr,
        frame: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        self.log.borrow_mut().push(Event::Map(page, frame, flags));
        if page.0 != self.base.0 + self.memory.len() {
            return Err(MapError::OutOfWindow);
        }
        self.memory.resize(self.memory.len() + PAGE_SIZE, 0);
        Ok(())
    }

    fn invalidate_all(&mut self) {
        self.log.borrow_mut().push(Event::Invalidate);
    }

    fn memory(&self, start: VirtAddr, len: usize) -> Option<&[u8]> {
        self.widest_view.set(self.widest_view.get().max(len));
        let offset = start.checked_offset_from(self.base)?;
        self.memory.get(offset..offset.checked_add(len)?)
    }

    fn memory_mut(&mut self, start: VirtAddr, len: usize) -> Option<&mut [u8]> {
        self.widest_view.set(self.widest_view.get().max(len));
        let offset = start.checked_offset_from(self.base)?;
        self.memory.get_mut(offset..offset.checked_add(len)?)
    }
}

struct RecordingFrames {
    next: usize,
    left: usize,
    log: Log,
}
impl FrameSource for RecordingFrames {
    fn acquire_frame(&mut self) -> Result<PhysicalAddress, OutOfMemory> {
        if self.left == 0 {
            return Err(OutOfMemory);
        }
        self.left -= 1;
        let frame = PhysicalAddress(self.next);
        self.next += PAGE_SIZE;
        self.log.borrow_mut().push(Event::Acquire(frame));
        Ok(frame)
    }
}

type RecordingHeap = Heap<RecordingSpace, RecordingFrames>;

fn kernel_heap(config: HeapConfig, frames: usize) -> (RecordingHeap, Log) {
    let log = Log::default();
    let space = RecordingSpace {
        base: config.start,
        memory: vec![0; config.initial_size()],
        log: Rc::clone(&log),
        widest_view: Cell::new(0),
    };
    let frames = RecordingFrames {
        next: 0x8020_0000,
        left: frames,
        log: Rc::clone(&log),
    };
    (Heap::new(space, frames, config), log)
}

#[test]
fn test_kernel_layout() {
    let config = HeapConfig::kernel();
    assert_eq!(config.start, KERNEL_HEAP_START);
    assert_eq!(config.initial_size(), INITIAL_HEAP_SIZE);
    assert_eq!(config.flags, PageFlags::PRESENT | PageFlags::WRITABLE);
    assert_eq!(HeapConfig::default(), config);

    let (heap, log) = kernel_heap(config, 0);
    assert!(log.borrow().is_empty(), "Creating the heap maps nothing");
    let stats = heap.check().expect("Heap should be consistent");
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.free_blocks, 1);
}

#[test]
fn test_grow_maps_then_invalidates() {
    let (mut heap, log) = kernel_heap(HeapConfig::kernel(), 4);
    let first = heap.allocate(100);
    assert!(log.borrow().is_empty(), "Nothing to grow for a small request");

    heap.allocate(5000);
    let frame = PhysicalAddress(0x8020_0000);
    assert_eq!(
        *log.borrow(),
        [
            Event::Acquire(frame),
            Event::Map(
                VirtAddr(KERNEL_HEAP_START.0 + INITIAL_HEAP_SIZE),
                frame,
                PageFlags::PRESENT | PageFlags::WRITABLE,
            ),
            Event::Invalidate,
        ],
    );
    assert_eq!(heap.end(), VirtAddr(KERNEL_HEAP_START.0 + 2 * PAGE_SIZE));
    heap.release(first);
    heap.check().expect("Heap should be consistent");
}

#[test]
fn test_user_heap_maps_user_pages() {
    let config = HeapConfig::kernel().with_user_access(true);
    let (mut heap, log) = kernel_heap(config, 4);
    heap.allocate(PAGE_SIZE);
    assert!(log.borrow().iter().any(|event| matches!(
        event,
        Event::Map(_, _, flags) if flags.user_accessible() && flags.writable()
    )));

    let config = config.with_user_access(false);
    assert!(!config.flags.user_accessible());
}

#[test]
fn test_failed_map_leaves_heap_intact() {
    let (mut heap, log) = kernel_heap(HeapConfig::kernel(), 4);
    // Pretend the next page is already taken by making the window discontiguous.
    heap.space_mut().memory.resize(INITIAL_HEAP_SIZE + 1, 0);
    assert!(heap.try_allocate(PAGE_SIZE).is_err());
    assert!(
        !log.borrow().contains(&Event::Invalidate),
        "Nothing to invalidate when the mapping failed",
    );
    assert_eq!(heap.end(), VirtAddr(KERNEL_HEAP_START.0 + INITIAL_HEAP_SIZE));
    heap.space_mut().memory.truncate(INITIAL_HEAP_SIZE);
    heap.check().expect("Heap should be consistent");
}

#[test]
fn test_heap_views_only_headers() {
    let (mut heap, _log) = kernel_heap(HeapConfig::kernel(), 4);
    // Setting up checks the whole initial region, before any payload exists.
    heap.space().widest_view.set(0);

    let p = heap.allocate(100);
    heap.allocate(5000);
    heap.release(p);
    heap.allocate(40);
    heap.check().expect("Heap should be consistent");
    heap.dump();
    assert_eq!(
        heap.space().widest_view.get(),
        HEADER_SIZE,
        "Live payloads must never be covered by a view the heap holds",
    );
}
