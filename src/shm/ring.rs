// BBO-RX — SHARED-MEMORY SPSC RING
// Bounded single-producer/single-consumer ring with a fixed #[repr(C)]
// layout, designed to be placement-initialized inside a POSIX shared-memory
// mapping and adopted by a separate consumer process.
//
// Producer and consumer cursors live on their own cache lines. The magic
// word doubles as the "already initialized" sentinel: it is written last,
// with release ordering, so an attaching process that observes it also
// observes a fully initialized header.

use std::cell::UnsafeCell;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};

/// Ring capacity in records. Power of two; ~2 MiB of payload at the
/// downstream record size.
pub const RING_CAPACITY: usize = 16384;
const _: () = assert!(RING_CAPACITY & (RING_CAPACITY - 1) == 0);

const RING_MAGIC: u64 = 0x4242_4F52_494E_4701; // "BBORING" + layout rev 1

/// Downstream consumer record. Wider 16-byte symbol, hardware-timestamp
/// annex fields included; the fast path zeroes the annex at publish time.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct GatewayBbo {
    /// Space-padded, final byte NUL.
    pub symbol: [u8; 16],
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_shares: u32,
    pub ask_shares: u32,
    pub spread: f64,
    pub timestamp_ns: i64,
    pub hw_t1: u32,
    pub hw_t2: u32,
    pub hw_t3: u32,
    pub hw_t4: u32,
    pub hw_latency_a_us: f64,
    pub hw_latency_b_us: f64,
    pub hw_latency_us: f64,
    pub hw_rx_timestamp: u64,
    pub hw_tx_timestamp: u64,
    pub valid: u8,
    pub _pad: [u8; 7],
}

pub const SYMBOL_MAX_LEN: usize = 16;
const _: () = assert!(mem::size_of::<GatewayBbo>() == 120);

/// A cursor on its own cache line so producer and consumer never share one.
#[repr(C, align(64))]
struct PaddedCursor {
    value: AtomicU64,
}

#[repr(C)]
pub struct SpscRing {
    magic: AtomicU64,
    capacity: u32,
    record_size: u32,
    _hdr_pad: [u8; 48],
    /// Producer cursor: monotonically increasing publish count.
    head: PaddedCursor,
    /// Consumer cursor: monotonically increasing consume count.
    tail: PaddedCursor,
    records: [UnsafeCell<GatewayBbo>; RING_CAPACITY],
}

// SAFETY: the record array is only written by the single producer at
// indices the consumer has not yet been released to read; the cursors
// provide release/acquire ordering across processes.
unsafe impl Sync for SpscRing {}
unsafe impl Send for SpscRing {}

impl SpscRing {
    pub const fn layout_bytes() -> usize {
        mem::size_of::<SpscRing>()
    }

    /// Impose the ring layout on raw (typically freshly mapped) memory.
    /// The magic word is stored last with release ordering.
    ///
    /// # Safety
    /// `mem` must point to at least `layout_bytes()` writable bytes aligned
    /// for `SpscRing`, not concurrently accessed during initialization.
    pub unsafe fn init_in_place(mem: *mut SpscRing) {
        std::ptr::write_bytes(mem as *mut u8, 0, Self::layout_bytes());
        (*mem).capacity = RING_CAPACITY as u32;
        (*mem).record_size = mem::size_of::<GatewayBbo>() as u32;
        (*mem).magic.store(RING_MAGIC, Ordering::Release);
    }

    /// True when the mapping holds an initialized ring of this exact layout.
    pub fn is_initialized(&self) -> bool {
        self.magic.load(Ordering::Acquire) == RING_MAGIC
            && self.capacity == RING_CAPACITY as u32
            && self.record_size == mem::size_of::<GatewayBbo>() as u32
    }

    /// Non-blocking publish. Copies the record by value; returns false when
    /// the ring is full. Never waits, never retries.
    #[inline(always)]
    pub fn try_publish(&self, record: &GatewayBbo) -> bool {
        let head = self.head.value.load(Ordering::Relaxed);
        let tail = self.tail.value.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= RING_CAPACITY as u64 {
            return false;
        }
        let slot = head as usize & (RING_CAPACITY - 1);
        unsafe { *self.records[slot].get() = *record };
        self.head.value.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Non-blocking consume for the reader side. A record observed here has
    /// all of its bytes visible: the acquire load pairs with the producer's
    /// release store.
    #[inline(always)]
    pub fn try_consume(&self, out: &mut GatewayBbo) -> bool {
        let tail = self.tail.value.load(Ordering::Relaxed);
        let head = self.head.value.load(Ordering::Acquire);
        if tail == head {
            return false;
        }
        let slot = tail as usize & (RING_CAPACITY - 1);
        *out = unsafe { *self.records[slot].get() };
        self.tail.value.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    pub fn len(&self) -> usize {
        let head = self.head.value.load(Ordering::Relaxed);
        let tail = self.tail.value.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        RING_CAPACITY
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Heap-backed ring for tests; the production ring lives in shm.
    pub struct OwnedRing(*mut SpscRing);

    impl OwnedRing {
        pub fn new() -> OwnedRing {
            let layout = std::alloc::Layout::new::<SpscRing>();
            unsafe {
                let mem = std::alloc::alloc(layout) as *mut SpscRing;
                assert!(!mem.is_null());
                SpscRing::init_in_place(mem);
                OwnedRing(mem)
            }
        }

        pub fn ring(&self) -> &SpscRing {
            unsafe { &*self.0 }
        }
    }

    impl Drop for OwnedRing {
        fn drop(&mut self) {
            unsafe { std::alloc::dealloc(self.0 as *mut u8, std::alloc::Layout::new::<SpscRing>()) };
        }
    }
}
