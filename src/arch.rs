//! Target-specific translation cache control.

/// Invalidate every cached address translation on this hart/core.
///
/// This is always a full flush: growing the heap may have restructured the table, so a
/// selective invalidation of the new page isn't enough.
#[inline]
pub fn flush_tlb_all() {
    #[cfg(all(target_os = "none", any(target_arch = "riscv32", target_arch = "riscv64")))]
    // SAFETY:
    // `sfence.vma` with both operands zero only orders and drops cached translations.
    unsafe {
        core::arch::asm!("sfence.vma zero, zero", options(nostack, preserves_flags));
    }

    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    // SAFETY:
    // Writing `cr3` back with its current value keeps the same address space and flushes every
    // non-global translation.
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags),
        );
    }

    // Hosted builds have no MMU of our own; keep the compiler from moving accesses across the
    // point where the mapping changed.
    #[cfg(not(target_os = "none"))]
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}
