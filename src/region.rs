//! An address space backed by one page table.

use core::ptr::NonNull;

use crate::{
    error::Result,
    paging::{
        AddressSpace, FrameSource, MapError, PAGE_SIZE, PAGE_TABLE_LENGTH, PageFlags, PageTable,
        PhysicalAddress, VirtAddr,
    },
};

/// A virtual window of up to [`PAGE_TABLE_LENGTH`] pages whose mappings live in one
/// [`PageTable`].
///
/// Entry `i` of the table maps the page at `base + i * PAGE_SIZE`. Only pages whose entry is
/// present can be viewed through [`AddressSpace::memory`].
pub struct PagedRegion<'t> {
    /// The table the MMU walks for this window.
    table: &'t mut PageTable,
    /// The first byte of the window.
    base: NonNull<u8>,
    /// The number of pages the window reserves.
    pages: usize,
    /// How many full translation flushes have been issued.
    flushes: usize,
}
impl<'t> PagedRegion<'t> {
    /// Make a region whose window starts at `base`.
    ///
    /// # Safety
    /// `table` must be the table the MMU uses to translate the `pages` pages starting at `base`,
    /// so that every page this region maps is valid for reads and writes. Nothing else may
    /// access those pages while the region exists.
    pub unsafe fn new(table: &'t mut PageTable, base: NonNull<u8>, pages: usize) -> Self {
        assert!(
            base.addr().get().is_multiple_of(PAGE_SIZE),
            "Unaligned region base 0x{:X}",
            base.addr(),
        );
        assert!(pages <= PAGE_TABLE_LENGTH, "Region larger than one table");
        // Heap payload addresses get turned back into pointers by address alone.
        _ = base.as_ptr().expose_provenance();
        Self {
            table,
            base,
            pages,
            flushes: 0,
        }
    }

    /// The first address of the window.
    pub fn base(&self) -> VirtAddr {
        VirtAddr(self.base.addr().get())
    }

    /// One past the last address of the window.
    pub fn limit(&self) -> VirtAddr {
        VirtAddr(self.base.addr().get() + self.pages * PAGE_SIZE)
    }

    /// The table backing this region.
    pub fn table(&self) -> &PageTable {
        self.table
    }

    /// How many full translation flushes this region has issued.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Map every page from the start of the window up to `end`.
    ///
    /// Used at boot to back the initial heap region before [`crate::Heap::new`].
    pub fn map_initial(
        &mut self,
        frames: &mut impl FrameSource,
        end: VirtAddr,
        flags: PageFlags,
    ) -> Result<()> {
        let mut page = self.base();
        while page < end {
            let frame = frames.acquire_frame()?;
            self.map_page(page, frame, flags)?;
            page = VirtAddr(page.0 + PAGE_SIZE);
        }
        self.invalidate_all();
        log::debug!("Mapped initial window {} - {end}", self.base());
        Ok(())
    }

    /// The table slot covering `page`.
    fn slot(&self, page: VirtAddr) -> Option<usize> {
        let slot = page.checked_offset_from(self.base())? / PAGE_SIZE;
        (slot < self.pages).then_some(slot)
    }

    /// The offset of `[start, start + len)` into the window, if all of it is mapped.
    fn mapped_offset(&self, start: VirtAddr, len: usize) -> Option<usize> {
        let offset = start.checked_offset_from(self.base())?;
        let end = offset.checked_add(len)?;
        if end > self.pages * PAGE_SIZE {
            return None;
        }
        let all_present = (offset / PAGE_SIZE..end.div_ceil(PAGE_SIZE))
            .all(|slot| self.table.entry(slot).is_some_and(|entry| entry.flags().present()));
        all_present.then_some(offset)
    }
}

impl AddressSpace for PagedRegion<'_> {
    fn map_page(
        &mut self,
        page: VirtAddr,
        frame: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        if !page.is_aligned(PAGE_SIZE) {
            return Err(MapError::Unaligned);
        }
        let slot = self.slot(page).ok_or(MapError::OutOfWindow)?;
        self.table.map(slot, frame, flags)?;
        log::debug!("Mapped page {page} (slot {slot}) to frame {frame} with {flags}");
        Ok(())
    }

    fn invalidate_all(&mut self) {
        crate::arch::flush_tlb_all();
        self.flushes += 1;
    }

    fn memory(&self, start: VirtAddr, len: usize) -> Option<&[u8]> {
        let offset = self.mapped_offset(start, len)?;
        // SAFETY:
        // The range is inside the window and every page of it is mapped, which by the constructor
        // precondition makes it valid for reads. `&self` keeps writers out.
        Some(unsafe { core::slice::from_raw_parts(self.base.as_ptr().add(offset), len) })
    }

    fn memory_mut(&mut self, start: VirtAddr, len: usize) -> Option<&mut [u8]> {
        let offset = self.mapped_offset(start, len)?;
        // SAFETY:
        // The range is inside the window and every page of it is mapped, which by the constructor
        // precondition makes it valid for writes. `&mut self` gives exclusive access.
        Some(unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr().add(offset), len) })
    }
}

// SAFETY:
// The region owns its window and table exclusively (by constructor precondition), so moving it to
// another thread moves that ownership with it.
unsafe impl Send for PagedRegion<'_> {}
