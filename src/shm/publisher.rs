// BBO-RX — RING PUBLISHER
// Producer-side handle to the cross-process ring. Opens an existing
// /bbo_ring_<name> segment when one is live, otherwise unlinks any stale
// remnant and creates a fresh one, placement-initializing the ring layout
// into the new mapping.
//
// The segment fd is closed immediately after mmap; the mapping keeps the
// segment alive. Drop unmaps but never unlinks — the consumer may still be
// attached.

use std::ffi::CString;
use std::ptr;

use bytemuck::Zeroable;

use crate::protocol::bbo::BboRecord;
use crate::shm::ring::{GatewayBbo, SpscRing, SYMBOL_MAX_LEN};

pub struct RingPublisher {
    ring: *mut SpscRing,
}

// SAFETY: the mapping outlives the handle and all ring access goes through
// the ring's atomic cursors.
unsafe impl Send for RingPublisher {}

fn segment_name(name: &str) -> Option<CString> {
    CString::new(format!("/bbo_ring_{}", name)).ok()
}

impl RingPublisher {
    /// Attach to the named segment, creating and initializing it when no
    /// live ring exists. Returns None on any mapping failure; init code
    /// treats that as fatal.
    pub fn open_or_create(name: &str) -> Option<RingPublisher> {
        let c_name = segment_name(name)?;
        let size = SpscRing::layout_bytes();

        unsafe {
            // A consumer-side tool may have created the ring already.
            let fd = libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666);
            if fd >= 0 {
                let ptr = libc::mmap(ptr::null_mut(), size,
                    libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0);
                libc::close(fd);
                if ptr != libc::MAP_FAILED {
                    let ring = ptr as *mut SpscRing;
                    if (*ring).is_initialized() {
                        eprintln!("[BBO-SHM] Connected to existing ring '{}'", name);
                        return Some(RingPublisher { ring });
                    }
                    // Stale or half-written segment from a crashed run.
                    libc::munmap(ptr, size);
                }
            }

            libc::shm_unlink(c_name.as_ptr());

            let fd = libc::shm_open(c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL, 0o666);
            if fd < 0 {
                eprintln!("[BBO-SHM] shm_open('{}') failed: {}",
                    name, std::io::Error::last_os_error());
                return None;
            }
            if libc::ftruncate(fd, size as libc::off_t) != 0 {
                eprintln!("[BBO-SHM] ftruncate to {} bytes failed: {}",
                    size, std::io::Error::last_os_error());
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
                return None;
            }
            let ptr = libc::mmap(ptr::null_mut(), size,
                libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0);
            libc::close(fd);
            if ptr == libc::MAP_FAILED {
                eprintln!("[BBO-SHM] mmap failed: {}", std::io::Error::last_os_error());
                libc::shm_unlink(c_name.as_ptr());
                return None;
            }

            let ring = ptr as *mut SpscRing;
            SpscRing::init_in_place(ring);
            eprintln!("[BBO-SHM] Created ring '{}' ({} records, {} KiB)",
                name, (*ring).capacity(), size / 1024);
            Some(RingPublisher { ring })
        }
    }

    /// Remove a named segment. Used by tooling and tests; a running
    /// consumer keeps its mapping until it unmaps.
    pub fn unlink(name: &str) {
        if let Some(c_name) = segment_name(name) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    /// Widen a fast-path record to the consumer format and hand it to the
    /// ring. The hardware-timestamp annex is zeroed: the fast path never
    /// carries it. Returns the ring's verdict; a false means the record was
    /// dropped and the caller counts it.
    #[inline(always)]
    pub fn publish(&self, fast: &BboRecord) -> bool {
        let mut out = GatewayBbo::zeroed();

        out.symbol[..8].copy_from_slice(&fast.symbol);
        for b in &mut out.symbol[8..SYMBOL_MAX_LEN - 1] {
            *b = b' ';
        }
        out.symbol[SYMBOL_MAX_LEN - 1] = 0;

        out.bid_price = fast.bid_price;
        out.ask_price = fast.ask_price;
        out.bid_shares = fast.bid_shares;
        out.ask_shares = fast.ask_shares;
        out.spread = fast.spread;
        out.timestamp_ns = fast.timestamp_ns as i64;
        out.valid = fast.valid;

        self.ring().try_publish(&out)
    }

    #[inline(always)]
    pub fn ring(&self) -> &SpscRing {
        unsafe { &*self.ring }
    }
}

impl Drop for RingPublisher {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ring as *mut libc::c_void, SpscRing::layout_bytes()) };
    }
}
