//! Page table code
//!
//! The heap never touches hardware paging structures directly. It asks a [`FrameSource`] for
//! physical memory and an [`AddressSpace`] to map it, and the [`PageTable`] here is the table
//! representation the provided [`crate::region::PagedRegion`] writes into.

use core::fmt;

use crate::error::OutOfMemory;

/// The size of a single memory page.
pub const PAGE_SIZE: usize = 4096;

/// The number of entries in a page table.
///
/// 512 entries of 64 bits each.
pub const PAGE_TABLE_LENGTH: usize = {
    let len = PAGE_SIZE / core::mem::size_of::<PageTableEntry>();
    assert!(len * core::mem::size_of::<PageTableEntry>() == PAGE_SIZE);
    len
};

/// A virtual address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub usize);
impl VirtAddr {
    /// Check whether `self` is aligned to a given alignment.
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0.is_multiple_of(align)
    }

    /// The distance from `base` up to `self`, or `None` if `self` lies below `base`.
    pub const fn checked_offset_from(self, base: Self) -> Option<usize> {
        self.0.checked_sub(base.0)
    }
}
impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// A physical address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(pub usize);
impl PhysicalAddress {
    /// Check whether `self` is aligned to a given alignment.
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0.is_multiple_of(align)
    }
}
impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

bitset::bitset!(
    /// Attribute bits of a page table entry.
    pub PageFlags(u64) {
        /// The entry maps a frame.
        Present = 0,
        /// Writes through this mapping are allowed.
        Writable = 1,
        /// User mode may access this mapping, not only the kernel.
        UserAccessible = 2,
    }
);

/// One entry in a [`PageTable`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageTableEntry(u64);
impl PageTableEntry {
    const FLAGS_MASK: u64 = 0xFFF;
    const ADDR_MASK: u64 = {
        let mask = 0x000F_FFFF_FFFF_F000;
        assert!(mask & Self::FLAGS_MASK == 0);
        mask
    };

    /// An entry which maps nothing.
    pub const EMPTY: Self = Self(0);

    /// Make an entry pointing at `frame` with the given flags.
    pub fn from_frame_flags(frame: PhysicalAddress, flags: PageFlags) -> Self {
        Self(((frame.0 as u64) & Self::ADDR_MASK) | (u64::from(flags) & Self::FLAGS_MASK))
    }

    /// The frame this entry points at.
    pub fn frame(self) -> PhysicalAddress {
        PhysicalAddress((self.0 & Self::ADDR_MASK) as usize)
    }

    /// The flags set on this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from(self.0 & Self::FLAGS_MASK)
    }

    /// Whether the entry is unused.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A single level of page table, covering [`PAGE_TABLE_LENGTH`] pages.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_LENGTH],
}
impl PageTable {
    /// Make a table with every entry empty.
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::EMPTY; PAGE_TABLE_LENGTH],
        }
    }

    /// Get the entry at `index`, if `index` is inside the table.
    pub fn entry(&self, index: usize) -> Option<PageTableEntry> {
        self.entries.get(index).copied()
    }

    /// Point the entry at `index` to `frame`.
    ///
    /// [`PageFlags::PRESENT`] is always added. Entries are never overwritten: once a slot maps
    /// a frame it keeps it.
    pub fn map(
        &mut self,
        index: usize,
        frame: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        if !frame.is_aligned(PAGE_SIZE) {
            return Err(MapError::Unaligned);
        }
        let entry = self.entries.get_mut(index).ok_or(MapError::OutOfWindow)?;
        if !entry.is_empty() {
            return Err(MapError::SlotOccupied);
        }
        *entry = PageTableEntry::from_frame_flags(frame, flags | PageFlags::PRESENT);
        Ok(())
    }

    /// The number of entries currently mapping a frame.
    pub fn mapped_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.flags().present())
            .count()
    }
}
impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a page couldn't be mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The slot for this page already maps a frame.
    SlotOccupied,
    /// The page lies outside what the table covers.
    OutOfWindow,
    /// The page or frame isn't page-aligned.
    Unaligned,
}
impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SlotOccupied => "slot already mapped",
            Self::OutOfWindow => "page outside the mapped window",
            Self::Unaligned => "unaligned page or frame",
        })
    }
}
impl core::error::Error for MapError {}

/// A supplier of physical page frames.
pub trait FrameSource {
    /// Hand out one page-aligned, zeroed frame.
    ///
    /// Frames handed to the heap are never given back.
    fn acquire_frame(&mut self) -> Result<PhysicalAddress, OutOfMemory>;
}

/// The virtual memory a heap lives in.
pub trait AddressSpace {
    /// Make `page` translate to `frame` with the given flags.
    fn map_page(
        &mut self,
        page: VirtAddr,
        frame: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError>;

    /// Drop every cached translation for the address space.
    ///
    /// Called after every [`Self::map_page`] before the new mapping is touched.
    fn invalidate_all(&mut self);

    /// View `len` mapped bytes starting at `start`.
    ///
    /// Returns `None` if any part of the range isn't mapped.
    fn memory(&self, start: VirtAddr, len: usize) -> Option<&[u8]>;

    /// Mutably view `len` mapped bytes starting at `start`.
    ///
    /// Returns `None` if any part of the range isn't mapped.
    fn memory_mut(&mut self, start: VirtAddr, len: usize) -> Option<&mut [u8]>;
}
