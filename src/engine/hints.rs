// BBO-RX — BRANCH AND PREFETCH HINTS
// Zero-overhead primitives for the hot path. Everything here must inline
// into the poll loop with no call cost.

use std::sync::atomic::{compiler_fence, fence, Ordering};

/// Branch hint: the condition is expected true. The cold call in the
/// not-taken arm pushes that arm out of the fall-through path.
#[inline(always)]
pub fn likely(b: bool) -> bool {
    if !b {
        cold_path();
    }
    b
}

/// Branch hint: the condition is expected false.
#[inline(always)]
pub fn unlikely(b: bool) -> bool {
    if b {
        cold_path();
    }
    b
}

#[inline(always)]
#[cold]
fn cold_path() {}

/// Prefetch one cache line into L1. Issue ~100-200 cycles before the load.
#[inline(always)]
pub unsafe fn prefetch_l1(addr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    { core::arch::asm!("prefetcht0 [{addr}]", addr = in(reg) addr, options(nostack, preserves_flags)); }
    #[cfg(target_arch = "aarch64")]
    { core::arch::asm!("prfm pldl1keep, [{addr}]", addr = in(reg) addr, options(nostack, preserves_flags)); }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    { let _ = addr; }
}

/// Prefetch one cache line into L2 (data needed soon, not immediately).
#[inline(always)]
pub unsafe fn prefetch_l2(addr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    { core::arch::asm!("prefetcht1 [{addr}]", addr = in(reg) addr, options(nostack, preserves_flags)); }
    #[cfg(target_arch = "aarch64")]
    { core::arch::asm!("prfm pldl2keep, [{addr}]", addr = in(reg) addr, options(nostack, preserves_flags)); }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    { let _ = addr; }
}

/// Compiler-only barrier: no memory operation is reordered across this
/// point by codegen. Emits no instruction.
#[inline(always)]
pub fn compiler_barrier() {
    compiler_fence(Ordering::SeqCst);
}

/// Full CPU memory fence. Not used on the hot path.
#[inline(always)]
pub fn memory_fence() {
    fence(Ordering::SeqCst);
}
