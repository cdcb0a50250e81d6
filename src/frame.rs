//! A simple physical frame source.

use crate::{
    error::OutOfMemory,
    paging::{FrameSource, PAGE_SIZE, PhysicalAddress},
};

/// Hands out consecutive frames from a fixed physical range.
///
/// Frames are never reclaimed, which is all the heap needs: it never unmaps a page once it has
/// grown into it.
#[derive(Debug)]
pub struct BumpFrameSource {
    /// The next frame to hand out.
    next: PhysicalAddress,
    /// One past the last usable byte.
    end: PhysicalAddress,
}
impl BumpFrameSource {
    /// Make a source over `[start, end)`.
    ///
    /// Both ends must be page-aligned.
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        assert!(start.is_aligned(PAGE_SIZE) && end.is_aligned(PAGE_SIZE));
        assert!(start.0 <= end.0);
        Self { next: start, end }
    }

    /// How many frames are still available.
    pub const fn remaining(&self) -> usize {
        (self.end.0 - self.next.0) / PAGE_SIZE
    }
}

impl FrameSource for BumpFrameSource {
    fn acquire_frame(&mut self) -> Result<PhysicalAddress, OutOfMemory> {
        if self.next >= self.end {
            log::error!("No physical frames left below {}", self.end);
            return Err(OutOfMemory);
        }
        let frame = self.next;
        self.next = PhysicalAddress(frame.0 + PAGE_SIZE);
        log::debug!("Handing out frame {frame}");
        Ok(frame)
    }
}
