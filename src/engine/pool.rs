// BBO-RX — SLOT POOL
// Pre-allocated circular array of BBO records. Acquire is a relaxed
// fetch_add plus a mask; there is no free — slots are reclaimed implicitly
// by wrap-around. Hugepage-backed when the system allows it.
//
// 1024 slots x 64 bytes = 64 KiB: the whole pool sits in L2.

use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::hints::compiler_barrier;
use crate::protocol::bbo::BboRecord;

/// Slot count. Must stay a power of two: indexing is a bitmask, never modulo.
pub const POOL_SLOTS: usize = 1024;
const _: () = assert!(POOL_SLOTS & (POOL_SLOTS - 1) == 0);
const _: () = assert!(POOL_SLOTS >= 64);

const POOL_BYTES: usize = POOL_SLOTS * std::mem::size_of::<BboRecord>();

/// Acquire counter in its own cache line. Single-writer (the receive
/// thread); atomic with relaxed ordering so a diagnostic reader can inspect
/// it without tearing.
#[repr(C, align(64))]
struct Head {
    value: AtomicU32,
}

enum Backing {
    HugePage,
    Aligned,
}

pub struct SlotPool {
    slots: *mut BboRecord,
    backing: Backing,
    head: Head,
}

// SAFETY: the pool owns its mapping; the acquire counter is atomic and all
// slot writes are confined to the owning receive thread.
unsafe impl Send for SlotPool {}

impl SlotPool {
    /// Allocate and pre-fault the pool. Backing order: anonymous hugepage
    /// mapping, 2 MiB explicit hugepage mapping, 64-byte-aligned heap.
    /// Complete failure aborts: without resident pre-allocated slots the
    /// latency contract cannot be met.
    pub fn new() -> SlotPool {
        let (slots, backing) = Self::allocate();
        let mut pool = SlotPool { slots, backing, head: Head { value: AtomicU32::new(0) } };
        pool.prefault();
        pool
    }

    fn allocate() -> (*mut BboRecord, Backing) {
        unsafe {
            let prot = libc::PROT_READ | libc::PROT_WRITE;
            let base = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            let p = libc::mmap(ptr::null_mut(), POOL_BYTES, prot, base | libc::MAP_HUGETLB, -1, 0);
            if p != libc::MAP_FAILED {
                return (p as *mut BboRecord, Backing::HugePage);
            }

            // Retry with an explicit 2 MiB page size hint.
            let huge_2m = 21 << libc::MAP_HUGE_SHIFT;
            let p = libc::mmap(ptr::null_mut(), POOL_BYTES, prot, base | libc::MAP_HUGETLB | huge_2m, -1, 0);
            if p != libc::MAP_FAILED {
                return (p as *mut BboRecord, Backing::HugePage);
            }

            let layout = std::alloc::Layout::from_size_align_unchecked(POOL_BYTES, 64);
            let p = std::alloc::alloc(layout) as *mut BboRecord;
            if p.is_null() {
                eprintln!("[BBO-POOL] Failed to allocate {} bytes", POOL_BYTES);
                std::process::abort();
            }
            (p, Backing::Aligned)
        }
    }

    /// Write every slot once so page faults land here, not in the poll loop.
    fn prefault(&mut self) {
        for i in 0..POOL_SLOTS {
            unsafe { (*self.slots.add(i)).clear() };
        }
    }

    /// Next slot in round-robin order. Always succeeds; the returned slot is
    /// exclusively the caller's until the counter wraps back to it.
    #[inline(always)]
    pub fn acquire(&mut self) -> &mut BboRecord {
        let idx = self.head.value.fetch_add(1, Ordering::Relaxed) as usize & (POOL_SLOTS - 1);
        unsafe { &mut *self.slots.add(idx) }
    }

    /// Touch one word per slot in ascending order to prime cache and TLB.
    pub fn warm_cache(&self) {
        let mut sink: u64 = 0;
        for i in 0..POOL_SLOTS {
            sink = sink.wrapping_add(unsafe { ptr::read_volatile(self.slots.add(i) as *const u64) });
        }
        compiler_barrier();
        let _ = sink;
    }

    #[inline(always)]
    pub fn current_head(&self) -> u32 {
        self.head.value.load(Ordering::Relaxed)
    }

    pub fn is_using_hugepages(&self) -> bool {
        matches!(self.backing, Backing::HugePage)
    }

    pub const fn len(&self) -> usize { POOL_SLOTS }
    pub const fn bytes(&self) -> usize { POOL_BYTES }
}

impl Drop for SlotPool {
    fn drop(&mut self) {
        unsafe {
            match self.backing {
                Backing::HugePage => {
                    libc::munmap(self.slots as *mut libc::c_void, POOL_BYTES);
                }
                Backing::Aligned => {
                    let layout = std::alloc::Layout::from_size_align_unchecked(POOL_BYTES, 64);
                    std::alloc::dealloc(self.slots as *mut u8, layout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_cache_line_aligned() {
        let mut pool = SlotPool::new();
        for _ in 0..POOL_SLOTS {
            let rec = pool.acquire();
            assert_eq!(rec as *const BboRecord as usize % 64, 0);
        }
    }

    #[test]
    fn acquire_is_round_robin() {
        let mut pool = SlotPool::new();
        let first = pool.acquire() as *const BboRecord as usize;
        let second = pool.acquire() as *const BboRecord as usize;
        assert_eq!(second - first, 64);
        assert_eq!(pool.current_head(), 2);
    }

    #[test]
    fn wrap_around_revisits_the_same_slot() {
        let mut pool = SlotPool::new();
        let first = pool.acquire() as *const BboRecord as usize;
        for _ in 0..POOL_SLOTS - 1 {
            pool.acquire();
        }
        let wrapped = pool.acquire() as *const BboRecord as usize;
        assert_eq!(first, wrapped);
        assert_eq!(pool.current_head(), POOL_SLOTS as u32 + 1);
    }

    #[test]
    fn pool_starts_zeroed() {
        let mut pool = SlotPool::new();
        let rec = pool.acquire();
        assert!(bytemuck::bytes_of(rec).iter().all(|&b| b == 0));
    }

    #[test]
    fn warm_cache_leaves_contents_intact() {
        let mut pool = SlotPool::new();
        pool.acquire().set_symbol(b"AMD");
        pool.warm_cache();
        assert_eq!(pool.current_head(), 1);
    }
}
