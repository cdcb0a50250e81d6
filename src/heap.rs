//! The kernel heap.
//!
//! An explicit free-list allocator over a contiguous virtual region:
//! - First-fit search for a free block strictly larger than the request.
//! - The match is split in place, leaving the remainder as a new free block.
//! - When nothing fits, the region grows by one page at its end and the terminal block absorbs
//!   it, then the search starts over.
//! - Releasing a block only flips its free flag. Neighbouring free blocks are not merged.

use crate::{
    block::{self, BadHeader, Block, BlockHeader, HEADER_SIZE, SpaceHeaders, Walk},
    config::HeapConfig,
    diag::{self, halt},
    error::{Exhaustion, HeapError, Result},
    paging::{AddressSpace, FrameSource, PAGE_SIZE, VirtAddr},
};

/// How many bytes the heap region grows by each time nothing fits.
pub const GROWTH_INCREMENT: usize = PAGE_SIZE;

/// A snapshot of the block list, as returned by [`Heap::check`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of blocks in the list.
    pub blocks: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Number of blocks in use.
    pub used_blocks: usize,
    /// Payload bytes in free blocks.
    pub free_bytes: usize,
    /// Payload bytes in used blocks.
    pub used_bytes: usize,
    /// Bytes between the heap start and the current heap end.
    pub span: usize,
    /// How many times the heap has grown.
    pub grows: usize,
}

/// A heap living in the mapped region of `A`, growing with frames from `F`.
///
/// The heap assumes a single caller at a time. Share it through [`crate::LockedHeap`] when that
/// isn't guaranteed.
pub struct Heap<A, F> {
    /// The virtual memory the heap lives in.
    space: A,
    /// Where new frames come from.
    frames: F,
    /// The layout the heap was created with.
    config: HeapConfig,
    /// One past the last byte of the heap region.
    end: VirtAddr,
    /// How many times the heap has grown.
    grows: usize,
}

impl<A: AddressSpace, F: FrameSource> Heap<A, F> {
    /// Set up a heap over the already-mapped region described by `config`.
    ///
    /// The whole region becomes a single free root block.
    pub fn new(mut space: A, frames: F, config: HeapConfig) -> Self {
        assert!(
            config.start.is_aligned(PAGE_SIZE),
            "Unaligned heap start {}",
            config.start,
        );
        assert!(
            config.end > config.start && config.initial_size().is_multiple_of(GROWTH_INCREMENT),
            "Heap region {} - {} isn't a whole number of pages",
            config.start,
            config.end,
        );
        assert!(
            space.memory(config.start, config.initial_size()).is_some(),
            "Heap region {} - {} isn't mapped",
            config.start,
            config.end,
        );
        let root = BlockHeader::new(config.initial_size() - HEADER_SIZE, true, None);
        let written = space
            .memory_mut(config.start, HEADER_SIZE)
            .and_then(|mem| root.write(mem, 0));
        assert!(written.is_some(), "Heap root at {} isn't writable", config.start);
        log::debug!("Heap init : start:{} end:{}", config.start, config.end);
        log::debug!("Heap first block size : {}", root.size());
        Self {
            space,
            frames,
            config,
            end: config.end,
            grows: 0,
        }
    }

    /// The first byte of the heap region.
    pub fn start(&self) -> VirtAddr {
        self.config.start
    }

    /// One past the last byte of the heap region.
    pub fn end(&self) -> VirtAddr {
        self.end
    }

    /// The configuration the heap was created with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// The address space the heap lives in.
    pub fn space(&self) -> &A {
        &self.space
    }

    /// Mutable access to the address space the heap lives in.
    ///
    /// Writing over block headers through this is exactly the kind of corruption
    /// [`Self::release`] halts on.
    pub fn space_mut(&mut self) -> &mut A {
        &mut self.space
    }

    /// The frame source the heap grows from.
    pub fn frames(&self) -> &F {
        &self.frames
    }

    /// Walk the block list from the root, in address order.
    pub fn walk(&self) -> Walk<SpaceHeaders<'_, A>> {
        Walk::new(SpaceHeaders::new(
            &self.space,
            self.config.start,
            self.span(),
        ))
    }

    /// Find the first free block whose payload is strictly larger than `size`.
    ///
    /// The terminal block additionally has to leave room for the header of the remainder, so that
    /// the last block in the list stays free and growing the heap always adds usable space.
    pub fn find_fit(&self, size: usize) -> Result<Option<Block>> {
        log::trace!("Heap find_fit {size}");
        for block in self.walk() {
            let block = block.map_err(|bad| self.corrupt(bad))?;
            if !block.header.is_free() || block.header.size() <= size {
                continue;
            }
            if block.is_terminal() && block.header.size() - size < HEADER_SIZE {
                continue;
            }
            return Ok(Some(block));
        }
        Ok(None)
    }

    /// Hand out `size` bytes of `block`, keeping whatever is left as a new free block behind it.
    ///
    /// If the leftover bytes can't hold a header, the whole block is handed out and keeps its
    /// size. Either way no bytes are created or lost: the blocks still tile the region exactly.
    ///
    /// `block` must have come from [`Self::find_fit`] with the same `size`, with no other heap
    /// operation in between.
    pub fn split(&mut self, block: Block, size: usize) -> Result<Block> {
        assert!(
            block.header.is_free() && block.header.size() > size,
            "Splitting a block that doesn't fit {size} bytes",
        );
        let mut header = block.header;
        header.set_free(false);
        let leftover = header.size() - size;
        if leftover >= HEADER_SIZE {
            let next_offset = block.payload_offset() + size;
            let next = BlockHeader::new(leftover - HEADER_SIZE, true, header.next());
            self.write_header(next_offset, &next)?;
            header.set_size(size);
            header.set_next(Some(next_offset));
            diag::trace_block(
                log::Level::Trace,
                "split next",
                self.addr_of(next_offset),
                &Block {
                    offset: next_offset,
                    header: next,
                },
            );
        }
        self.write_header(block.offset, &header)?;

        let block = Block {
            offset: block.offset,
            header,
        };
        diag::trace_block(log::Level::Trace, "split prev", self.addr_of(block.offset), &block);
        Ok(block)
    }

    /// Extend the heap region by [`GROWTH_INCREMENT`] bytes.
    ///
    /// A fresh frame is mapped right after the current end, every cached translation is dropped,
    /// and the terminal block absorbs the new page.
    pub fn grow(&mut self) -> Result<()> {
        log::debug!("Heap grow called at end {}", self.end);
        let frame = self.frames.acquire_frame()?;
        self.space.map_page(self.end, frame, self.config.flags)?;
        self.space.invalidate_all();
        log::debug!("Heap grow new frame : {frame}");

        let last = self.terminal_block()?;
        let mut header = last.header;
        header.set_size(header.size() + GROWTH_INCREMENT);
        self.write_header(last.offset, &header)?;
        self.end = VirtAddr(self.end.0 + GROWTH_INCREMENT);
        self.grows += 1;

        if log::log_enabled!(log::Level::Debug) {
            self.dump();
        }
        log::debug!("Heap after grow {}", self.end);
        Ok(())
    }

    /// Allocate `size` bytes, returning the address of the payload.
    ///
    /// Grows the heap one increment at a time until the request fits, up to
    /// [`HeapConfig::max_grows`] times.
    pub fn try_allocate(&mut self, size: usize) -> Result<VirtAddr> {
        log::debug!("Heap malloc {size}");
        let mut grows = 0;
        loop {
            if let Some(block) = self.find_fit(size)? {
                let block = self.split(block, size)?;
                return Ok(self.addr_of(block.payload_offset()));
            }
            if grows == self.config.max_grows {
                log::error!("Heap malloc {size} still didn't fit after growing {grows} times");
                return Err(Exhaustion::GrowLimit { attempts: grows }.into());
            }
            log::debug!("Heap no more empty blocks ... growing ...");
            self.grow()?;
            grows += 1;
        }
    }

    /// Allocate `size` bytes, halting if that's impossible.
    pub fn allocate(&mut self, size: usize) -> VirtAddr {
        match self.try_allocate(size) {
            Ok(payload) => payload,
            Err(err) => halt!("malloc({size}) failed: {err}"),
        }
    }

    /// Mark the block whose payload starts at `payload` as free.
    ///
    /// Fails with [`HeapError::CorruptHeap`] if the bytes in front of `payload` aren't a valid
    /// header.
    pub fn try_release(&mut self, payload: VirtAddr) -> Result<()> {
        let block = self.block_at(payload)?;
        let mut header = block.header;
        header.set_free(true);
        self.write_header(block.offset, &header)?;
        log::debug!("Heap free {payload}");
        Ok(())
    }

    /// Mark the block whose payload starts at `payload` as free, halting on a corrupt header.
    pub fn release(&mut self, payload: VirtAddr) {
        if let Err(err) = self.try_release(payload) {
            halt!("free({payload}) - freeing bad block: {err}");
        }
    }

    /// The payload bytes of the block starting at `payload`.
    pub fn payload_mut(&mut self, payload: VirtAddr) -> Result<&mut [u8]> {
        let block = self.block_at(payload)?;
        let unmapped = HeapError::CorruptHeap {
            header: self.addr_of(block.offset),
            magic: Some(block.header.magic),
        };
        self.space
            .memory_mut(payload, block.header.size())
            .ok_or(unmapped)
    }

    /// Log every block in the list.
    pub fn dump(&self) {
        for block in self.walk() {
            match block {
                Ok(block) => {
                    diag::trace_block(log::Level::Debug, "mb", self.addr_of(block.offset), &block);
                }
                Err(bad) => {
                    log::debug!("mb: {} unreadable", self.addr_of(bad.offset));
                }
            }
        }
    }

    /// Verify the whole block list, returning a summary of it.
    ///
    /// Every header must carry the magic value, each block must start where the previous one
    /// ends, and the terminal block must end exactly at the heap end.
    pub fn check(&self) -> Result<HeapStats> {
        let mut stats = HeapStats {
            span: self.span(),
            grows: self.grows,
            ..HeapStats::default()
        };
        let mut expected = 0;
        for block in self.walk() {
            let block = block.map_err(|bad| self.corrupt(bad))?;
            block::validate(&block).map_err(|bad| self.corrupt(bad))?;
            if block.offset != expected || (block.is_terminal() && block.end() != stats.span) {
                return Err(self.corrupt(BadHeader {
                    offset: block.offset,
                    magic: Some(block.header.magic),
                }));
            }
            expected = block.end();
            stats.blocks += 1;
            if block.header.is_free() {
                stats.free_blocks += 1;
                stats.free_bytes += block.header.size();
            } else {
                stats.used_blocks += 1;
                stats.used_bytes += block.header.size();
            }
        }
        Ok(stats)
    }

    /// The number of bytes between the heap start and end.
    fn span(&self) -> usize {
        self.end.0 - self.config.start.0
    }

    /// The address of a heap offset.
    fn addr_of(&self, offset: usize) -> VirtAddr {
        VirtAddr(self.config.start.0 + offset)
    }

    /// Store `header` at `offset`, viewing only the header's own bytes.
    fn write_header(&mut self, offset: usize, header: &BlockHeader) -> Result<()> {
        let addr = self.addr_of(offset);
        let inside = offset
            .checked_add(HEADER_SIZE)
            .is_some_and(|end| end <= self.span());
        let mem = if inside {
            self.space.memory_mut(addr, HEADER_SIZE)
        } else {
            None
        };
        mem.and_then(|mem| header.write(mem, 0))
            .ok_or(HeapError::CorruptHeap {
                header: addr,
                magic: None,
            })
    }

    fn corrupt(&self, bad: BadHeader) -> HeapError {
        corrupt_at(self.config.start, bad)
    }

    /// The last block in the list, which must end at the heap end.
    fn terminal_block(&self) -> Result<Block> {
        let last = self
            .walk()
            .last()
            .unwrap_or(Err(BadHeader {
                offset: 0,
                magic: None,
            }))
            .map_err(|bad| self.corrupt(bad))?;
        if last.end() != self.span() {
            return Err(self.corrupt(BadHeader {
                offset: last.offset,
                magic: Some(last.header.magic),
            }));
        }
        Ok(last)
    }

    /// The validated block whose payload starts at `payload`.
    fn block_at(&self, payload: VirtAddr) -> Result<Block> {
        let header_addr = VirtAddr(payload.0.wrapping_sub(HEADER_SIZE));
        let outside = HeapError::CorruptHeap {
            header: header_addr,
            magic: None,
        };
        let offset = payload
            .checked_offset_from(self.config.start)
            .and_then(|offset| offset.checked_sub(HEADER_SIZE))
            .filter(|offset| offset + HEADER_SIZE <= self.span())
            .ok_or(outside)?;
        let header = self
            .space
            .memory(header_addr, HEADER_SIZE)
            .and_then(|mem| BlockHeader::read(mem, 0))
            .ok_or(outside)?;
        let block = Block { offset, header };
        block::validate(&block).map_err(|bad| self.corrupt(bad))?;
        Ok(block)
    }
}

/// Turn a bad header at a heap offset into an error naming its address.
fn corrupt_at(start: VirtAddr, bad: BadHeader) -> HeapError {
    HeapError::CorruptHeap {
        header: VirtAddr(start.0 + bad.offset),
        magic: bad.magic,
    }
}
