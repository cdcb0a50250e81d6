//! The block list.
//!
//! The heap region is carved into blocks, each a [`BlockHeader`] followed directly by its payload.
//! Headers are linked in address order by byte offset from the start of the region, so the first
//! block (the root) always lives at offset 0 and the last block ends at the heap's high-water
//! mark.
//!
//! ```text
//!   offset 0                                                            heap_end
//!   | header | payload (size) | header | payload (size) | header | payload ... |
//!   \_ root ____________________/ next \__________________/ next \_ terminal _/
//! ```

use bytemuck::{Pod, Zeroable};

use crate::paging::{AddressSpace, VirtAddr};

/// The value every live header carries in [`BlockHeader::magic`].
pub const MAGIC: u32 = 0x4D42_4C4B;

/// The number of bytes a header occupies in front of its payload.
pub const HEADER_SIZE: usize = {
    let size = core::mem::size_of::<BlockHeader>();
    // Keeps payloads 8-aligned when every block size is too.
    assert!(size.is_multiple_of(8));
    size
};

/// Stored in [`BlockHeader::next`] by the terminal block.
const TERMINAL: u64 = u64::MAX;

/// The metadata in front of every block.
///
/// Stored in heap memory as plain bytes, so it may sit at any alignment.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BlockHeader {
    /// Always [`MAGIC`] for a well-formed header.
    pub magic: u32,
    /// Nonzero if the block is free.
    free: u32,
    /// Payload length in bytes, not counting the header.
    size: u64,
    /// Offset of the next header, or [`TERMINAL`].
    next: u64,
}
impl BlockHeader {
    /// Make a well-formed header.
    pub const fn new(size: usize, free: bool, next: Option<usize>) -> Self {
        Self {
            magic: MAGIC,
            free: free as u32,
            size: size as u64,
            next: match next {
                Some(offset) => offset as u64,
                None => TERMINAL,
            },
        }
    }

    /// Payload length in bytes.
    pub const fn size(&self) -> usize {
        self.size as usize
    }

    /// Whether the block is free.
    pub const fn is_free(&self) -> bool {
        self.free != 0
    }

    /// The offset of the following header, or `None` for the terminal block.
    pub const fn next(&self) -> Option<usize> {
        match self.next {
            TERMINAL => None,
            offset => Some(offset as usize),
        }
    }

    /// Set the payload length.
    pub fn set_size(&mut self, size: usize) {
        self.size = size as u64;
    }

    /// Mark the block free or used.
    pub fn set_free(&mut self, free: bool) {
        self.free = u32::from(free);
    }

    /// Link to the header at `next`, or make this the terminal block.
    pub fn set_next(&mut self, next: Option<usize>) {
        self.next = next.map_or(TERMINAL, |offset| offset as u64);
    }

    /// Whether the header carries [`MAGIC`].
    pub const fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    /// Read the header stored at `offset` in `mem`.
    ///
    /// Returns `None` if the header would run past the end of `mem`.
    pub fn read(mem: &[u8], offset: usize) -> Option<Self> {
        let bytes = mem.get(offset..offset.checked_add(HEADER_SIZE)?)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Store the header at `offset` in `mem`.
    ///
    /// Returns `None`, writing nothing, if the header would run past the end of `mem`.
    pub fn write(&self, mem: &mut [u8], offset: usize) -> Option<()> {
        mem.get_mut(offset..offset.checked_add(HEADER_SIZE)?)?
            .copy_from_slice(bytemuck::bytes_of(self));
        Some(())
    }
}

/// A header and the offset it was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    /// Where the header starts, relative to the heap start.
    pub offset: usize,
    /// The header as read.
    pub header: BlockHeader,
}
impl Block {
    /// Where the payload starts, relative to the heap start.
    pub const fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    /// One past the last payload byte, relative to the heap start.
    pub const fn end(&self) -> usize {
        self.payload_offset() + self.header.size()
    }

    /// Whether this is the last block in the list.
    pub const fn is_terminal(&self) -> bool {
        self.header.next().is_none()
    }
}

/// A header that couldn't be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BadHeader {
    /// Where the header was expected, relative to the heap start.
    pub offset: usize,
    /// The magic found there, or `None` if there was no header to read.
    pub magic: Option<u32>,
}

/// Check that `block` carries the magic value.
pub fn validate(block: &Block) -> Result<(), BadHeader> {
    if block.header.is_valid() {
        Ok(())
    } else {
        Err(BadHeader {
            offset: block.offset,
            magic: Some(block.header.magic),
        })
    }
}

/// Somewhere block headers can be read from, by offset from the heap start.
pub trait HeaderSource {
    /// Read the header at `offset`, or `None` if there's no readable header there.
    fn header_at(&self, offset: usize) -> Option<BlockHeader>;
}

impl HeaderSource for &[u8] {
    fn header_at(&self, offset: usize) -> Option<BlockHeader> {
        BlockHeader::read(self, offset)
    }
}

/// The headers of a heap living in an [`AddressSpace`].
///
/// Each read views only the bytes of one header, never the payloads around it, which may be in
/// use elsewhere.
pub struct SpaceHeaders<'a, A> {
    space: &'a A,
    /// The first byte of the heap region.
    start: VirtAddr,
    /// The number of bytes from the heap start to its end.
    span: usize,
}
impl<'a, A: AddressSpace> SpaceHeaders<'a, A> {
    /// Read headers of the heap `[start, start + span)` in `space`.
    pub fn new(space: &'a A, start: VirtAddr, span: usize) -> Self {
        Self { space, start, span }
    }
}
impl<A: AddressSpace> HeaderSource for SpaceHeaders<'_, A> {
    fn header_at(&self, offset: usize) -> Option<BlockHeader> {
        if offset.checked_add(HEADER_SIZE)? > self.span {
            return None;
        }
        let mem = self
            .space
            .memory(VirtAddr(self.start.0 + offset), HEADER_SIZE)?;
        BlockHeader::read(mem, 0)
    }
}

/// Iterate over the blocks of a heap region in address order, starting from the root.
///
/// The walk ends after the terminal block. A link that points outside the region, or backwards,
/// is yielded as an error and ends the walk, so a walk is always finite.
pub struct Walk<S> {
    /// Where headers are read from.
    headers: S,
    /// The next header to read.
    next: Option<usize>,
    /// Only links strictly past this offset are followed.
    floor: Option<usize>,
}
impl<S: HeaderSource> Walk<S> {
    /// Start a walk at the root block.
    pub fn new(headers: S) -> Self {
        Self {
            headers,
            next: Some(0),
            floor: None,
        }
    }
}
impl<S: HeaderSource> Iterator for Walk<S> {
    type Item = Result<Block, BadHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next.take()?;
        if self.floor.is_some_and(|floor| offset <= floor) {
            return Some(Err(BadHeader {
                offset,
                magic: None,
            }));
        }
        let Some(header) = self.headers.header_at(offset) else {
            return Some(Err(BadHeader {
                offset,
                magic: None,
            }));
        };
        self.floor = Some(offset);
        self.next = header.next();
        Some(Ok(Block { offset, header }))
    }
}
