//! Error types.

use core::{error, fmt};

use crate::paging::{MapError, VirtAddr};

/// A [`core::result::Result`] defaulting to [`HeapError`].
pub type Result<T, E = HeapError> = core::result::Result<T, E>;

/// Every failure the heap can run into.
///
/// Both variants are fatal for the public entry points; the `try_*` variants hand them back so
/// callers with a better halt path can use their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// A block header failed validation.
    CorruptHeap {
        /// Where the header was expected.
        header: VirtAddr,
        /// The magic value found there, or `None` if the address isn't inside the mapped heap.
        magic: Option<u32>,
    },
    /// The heap needed to grow and couldn't.
    ResourceExhaustion(Exhaustion),
}
impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptHeap {
                header,
                magic: Some(magic),
            } => write!(f, "Corrupt heap block at {header} (magic {magic:#X})"),
            Self::CorruptHeap {
                header,
                magic: None,
            } => write!(f, "Corrupt heap block at {header} (outside the heap)"),
            Self::ResourceExhaustion(reason) => write!(f, "Heap exhausted: {reason}"),
        }
    }
}
impl error::Error for HeapError {}

impl From<Exhaustion> for HeapError {
    fn from(reason: Exhaustion) -> Self {
        Self::ResourceExhaustion(reason)
    }
}
impl From<OutOfMemory> for HeapError {
    fn from(_: OutOfMemory) -> Self {
        Self::ResourceExhaustion(Exhaustion::NoFrames)
    }
}
impl From<MapError> for HeapError {
    fn from(err: MapError) -> Self {
        Self::ResourceExhaustion(Exhaustion::NoPageSlot(err))
    }
}

/// Why growing the heap failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// The frame source has no physical memory left.
    NoFrames,
    /// The page table wouldn't take another mapping.
    NoPageSlot(MapError),
    /// A single allocation grew the heap the maximum number of times and still didn't fit.
    GrowLimit {
        /// How many times the heap grew for this request.
        attempts: usize,
    },
}
impl fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrames => f.write_str("out of physical frames"),
            Self::NoPageSlot(err) => write!(f, "no page table slot ({err})"),
            Self::GrowLimit { attempts } => {
                write!(f, "request didn't fit after growing {attempts} times")
            }
        }
    }
}

/// The frame source ran out of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;
impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Out of memory")
    }
}
impl error::Error for OutOfMemory {}
