//! Diagnostics: heap traces and the fatal halt path.

use core::fmt;

use hex_display::HexDisplayExt as _;

use crate::{block::Block, paging::VirtAddr};

/// Log a fatal heap condition and stop the kernel.
///
/// Kernel builds abort on panic, so this never returns to the caller.
macro_rules! halt {
    ($($arg:tt)*) => {
        $crate::diag::halt_with(::core::format_args!($($arg)*))
    };
}
pub(crate) use halt;

#[cold]
#[track_caller]
pub(crate) fn halt_with(args: fmt::Arguments<'_>) -> ! {
    log::error!("HEAP: {args}");
    panic!("HEAP: {args}");
}

/// Emit one line describing `block`, which lives at `addr`.
pub(crate) fn trace_block(level: log::Level, what: &str, addr: VirtAddr, block: &Block) {
    log::log!(
        level,
        "{what}: {addr} mag:{:X} siz:{} free:{} [{}]",
        block.header.magic,
        block.header.size(),
        block.header.is_free(),
        bytemuck::bytes_of(&block.header).hex(),
    );
}
