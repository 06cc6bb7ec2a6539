// BBO-RX — AF_XDP RECEIVE PORT
// Production RxPort: one AF_XDP socket bound to a single (interface, queue)
// pair, RX-only. UMEM on hugepages when available, a fixed free-stack of
// frame indices, and fence-based fill/rx ring accounting. libbpf loads its
// default redirect program at socket creation, so all queue traffic lands
// here once the NIC is collapsed to the bound queue.
//
// Zero-copy bind is attempted first; copy mode is the fallback for drivers
// and veth setups that lack it.

use std::ffi::CString;
use std::mem;
use std::ptr;
use std::sync::atomic::{fence, AtomicU32, Ordering};

use libbpf_sys::{
    xdp_desc, xsk_ring_cons, xsk_ring_prod, xsk_socket, xsk_socket__create, xsk_socket__delete,
    xsk_socket__fd, xsk_socket_config, xsk_umem, xsk_umem__create, xsk_umem__delete,
    xsk_umem_config,
};

use crate::nic::{PktHandle, RxPort, BURST_SIZE, FRAME_COUNT, FRAME_SIZE, RX_RING_SIZE};

const UMEM_BYTES: usize = FRAME_COUNT * FRAME_SIZE as usize;

// sockaddr_xdp bind flags (if_xdp.h).
const XDP_COPY: u16 = 1 << 1;
const XDP_ZEROCOPY: u16 = 1 << 2;

// ============================================================================
// FRAME SLAB — free-stack of UMEM frame indices
// ============================================================================

#[repr(align(64))]
struct FrameSlab {
    stack: Box<[u32]>,
    top: usize,
}

impl FrameSlab {
    fn new(capacity: usize) -> FrameSlab {
        let mut vec = Vec::with_capacity(capacity);
        for i in 0..capacity {
            vec.push(i as u32);
        }
        FrameSlab { stack: vec.into_boxed_slice(), top: capacity }
    }

    #[inline(always)]
    fn alloc(&mut self) -> Option<u32> {
        if self.top == 0 {
            return None;
        }
        self.top -= 1;
        unsafe { Some(*self.stack.get_unchecked(self.top)) }
    }

    #[inline(always)]
    fn free(&mut self, idx: u32) {
        if self.top < self.stack.len() {
            unsafe { *self.stack.get_unchecked_mut(self.top) = idx };
            self.top += 1;
        }
    }
}

// ============================================================================
// RING VIEWS (SPSC against the kernel, explicit fences)
// ============================================================================

struct FillRing {
    producer: *mut u32,
    consumer: *mut u32,
    ring: *mut u64,
    mask: u32,
    local_prod: u32,
}

impl FillRing {
    unsafe fn new(r: &xsk_ring_prod) -> FillRing {
        let init = (*(r.producer as *mut AtomicU32)).load(Ordering::Relaxed);
        FillRing {
            producer: r.producer,
            consumer: r.consumer,
            ring: r.ring as *mut u64,
            mask: r.mask as u32,
            local_prod: init,
        }
    }

    #[inline(always)]
    unsafe fn available(&self) -> u32 {
        let cons = (*(self.consumer as *mut AtomicU32)).load(Ordering::Acquire);
        (self.mask + 1) - self.local_prod.wrapping_sub(cons)
    }

    #[inline(always)]
    unsafe fn stage(&mut self, addr: u64) {
        *self.ring.offset((self.local_prod & self.mask) as isize) = addr;
        self.local_prod = self.local_prod.wrapping_add(1);
    }

    #[inline(always)]
    unsafe fn commit(&mut self) {
        fence(Ordering::Release);
        (*(self.producer as *mut AtomicU32)).store(self.local_prod, Ordering::Relaxed);
    }
}

struct RxRing {
    producer: *mut u32,
    consumer: *mut u32,
    ring: *const xdp_desc,
    mask: u32,
}

impl RxRing {
    unsafe fn new(r: &xsk_ring_cons) -> RxRing {
        RxRing {
            producer: r.producer,
            consumer: r.consumer,
            ring: r.ring as *const xdp_desc,
            mask: r.mask as u32,
        }
    }

    #[inline(always)]
    unsafe fn consume(&mut self, out: &mut [xdp_desc], limit: usize) -> usize {
        let cons_ptr = self.consumer as *mut AtomicU32;
        let prod_ptr = self.producer as *mut AtomicU32;
        let cons = (*cons_ptr).load(Ordering::Relaxed);
        let prod = (*prod_ptr).load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        let available = prod.wrapping_sub(cons) as usize;
        if available == 0 {
            return 0;
        }
        let count = available.min(limit);
        for (i, slot) in out.iter_mut().take(count).enumerate() {
            *slot = *self.ring.add((cons.wrapping_add(i as u32) & self.mask) as usize);
        }
        (*cons_ptr).store(cons.wrapping_add(count as u32), Ordering::Release);
        count
    }
}

// ============================================================================
// PORT
// ============================================================================

pub struct XdpPort {
    umem_area: *mut u8,
    umem_handle: *mut xsk_umem,
    sock_handle: *mut xsk_socket,
    rx: RxRing,
    fq: FillRing,
    slab: FrameSlab,
    pub zero_copy: bool,
}

unsafe impl Send for XdpPort {}

impl XdpPort {
    /// Bind to `(if_name, queue_id)`. Any failure here is an init failure:
    /// the caller logs and refuses to enter the run state.
    pub fn create(if_name: &str, queue_id: u32) -> Option<XdpPort> {
        let c_ifname = CString::new(if_name).ok()?;
        raise_memlock_limit();

        unsafe {
            let prot = libc::PROT_READ | libc::PROT_WRITE;
            let base = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE;
            let mut umem_area =
                libc::mmap(ptr::null_mut(), UMEM_BYTES, prot, base | libc::MAP_HUGETLB, -1, 0);
            if umem_area == libc::MAP_FAILED {
                umem_area = libc::mmap(ptr::null_mut(), UMEM_BYTES, prot, base, -1, 0);
            }
            if umem_area == libc::MAP_FAILED {
                eprintln!("[BBO-NIC] UMEM mmap of {} MiB failed", UMEM_BYTES >> 20);
                return None;
            }

            let umem_cfg = xsk_umem_config {
                fill_size: RX_RING_SIZE,
                comp_size: RX_RING_SIZE,
                frame_size: FRAME_SIZE,
                frame_headroom: 0,
                flags: 0,
            };
            let mut umem_handle: *mut xsk_umem = ptr::null_mut();
            let mut fq_def: xsk_ring_prod = mem::zeroed();
            let mut cq_def: xsk_ring_cons = mem::zeroed();
            let ret = xsk_umem__create(
                &mut umem_handle,
                umem_area,
                UMEM_BYTES as u64,
                &mut fq_def,
                &mut cq_def,
                &umem_cfg,
            );
            if ret != 0 {
                eprintln!("[BBO-NIC] xsk_umem__create failed: {}", ret);
                libc::munmap(umem_area, UMEM_BYTES);
                return None;
            }

            let mut sock_handle: *mut xsk_socket = ptr::null_mut();
            let mut rx_def: xsk_ring_cons = mem::zeroed();
            let mut zero_copy = true;
            let mut sock_cfg: xsk_socket_config = mem::zeroed();
            sock_cfg.rx_size = RX_RING_SIZE;
            sock_cfg.tx_size = 0;
            sock_cfg.bind_flags = XDP_ZEROCOPY;
            let mut ret = xsk_socket__create(
                &mut sock_handle,
                c_ifname.as_ptr(),
                queue_id,
                umem_handle,
                &mut rx_def,
                ptr::null_mut(),
                &sock_cfg,
            );
            if ret != 0 {
                // Driver without zero-copy support (or veth): copy mode.
                zero_copy = false;
                sock_cfg.bind_flags = XDP_COPY;
                ret = xsk_socket__create(
                    &mut sock_handle,
                    c_ifname.as_ptr(),
                    queue_id,
                    umem_handle,
                    &mut rx_def,
                    ptr::null_mut(),
                    &sock_cfg,
                );
            }
            if ret != 0 {
                eprintln!("[BBO-NIC] xsk_socket__create on {}:{} failed: {}", if_name, queue_id, ret);
                xsk_umem__delete(umem_handle);
                libc::munmap(umem_area, UMEM_BYTES);
                return None;
            }

            let mut port = XdpPort {
                umem_area: umem_area as *mut u8,
                umem_handle,
                sock_handle,
                rx: RxRing::new(&rx_def),
                fq: FillRing::new(&fq_def),
                slab: FrameSlab::new(FRAME_COUNT),
                zero_copy,
            };
            port.refill_fill_queue();
            eprintln!("[BBO-NIC] AF_XDP bound to {}:{} ({}, fd={})",
                if_name, queue_id,
                if zero_copy { "zero-copy" } else { "copy mode" },
                xsk_socket__fd(port.sock_handle));
            Some(port)
        }
    }

    /// Top the fill queue up from the frame slab.
    #[inline(always)]
    fn refill_fill_queue(&mut self) {
        unsafe {
            let room = self.fq.available();
            let mut staged = 0;
            for _ in 0..room {
                match self.slab.alloc() {
                    Some(idx) => {
                        self.fq.stage(idx as u64 * FRAME_SIZE as u64);
                        staged += 1;
                    }
                    None => break,
                }
            }
            if staged > 0 {
                self.fq.commit();
            }
        }
    }
}

impl RxPort for XdpPort {
    #[inline(always)]
    fn rx_burst(&mut self, out: &mut [PktHandle; BURST_SIZE]) -> usize {
        self.refill_fill_queue();
        let mut descs = [xdp_desc { addr: 0, len: 0, options: 0 }; BURST_SIZE];
        let count = unsafe { self.rx.consume(&mut descs, BURST_SIZE) };
        for i in 0..count {
            out[i] = PktHandle {
                data: unsafe { self.umem_area.add(descs[i].addr as usize) },
                len: descs[i].len,
                token: descs[i].addr,
            };
        }
        count
    }

    #[inline(always)]
    fn release(&mut self, pkt: PktHandle) {
        self.slab.free((pkt.token / FRAME_SIZE as u64) as u32);
    }
}

impl Drop for XdpPort {
    fn drop(&mut self) {
        unsafe {
            xsk_socket__delete(self.sock_handle);
            xsk_umem__delete(self.umem_handle);
            libc::munmap(self.umem_area as *mut libc::c_void, UMEM_BYTES);
        }
    }
}

// ============================================================================
// INTERFACE HELPERS (COLD PATH)
// ============================================================================

/// UMEM pages must be lockable; bump RLIMIT_MEMLOCK before creating it.
fn raise_memlock_limit() {
    unsafe {
        let needed = (UMEM_BYTES + (16 << 20)) as libc::rlim_t;
        let rlim = libc::rlimit { rlim_cur: needed, rlim_max: needed };
        if libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) != 0 {
            let rlim = libc::rlimit {
                rlim_cur: libc::RLIM_INFINITY,
                rlim_max: libc::RLIM_INFINITY,
            };
            libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim);
        }
    }
}

/// Best-effort IFF_PROMISC on the bound interface. Denial is a warning, not
/// a failure.
pub fn enable_promiscuous(if_name: &str) {
    unsafe {
        let sock = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if sock < 0 {
            eprintln!("[BBO-NIC] WARNING: probe socket for promiscuous mode failed");
            return;
        }
        let mut ifr: libc::ifreq = mem::zeroed();
        let name_bytes = if_name.as_bytes();
        let copy_len = name_bytes.len().min(libc::IFNAMSIZ - 1);
        ptr::copy_nonoverlapping(name_bytes.as_ptr(), ifr.ifr_name.as_mut_ptr() as *mut u8, copy_len);

        if libc::ioctl(sock, libc::SIOCGIFFLAGS as libc::c_ulong, &mut ifr) < 0 {
            eprintln!("[BBO-NIC] WARNING: SIOCGIFFLAGS on {} failed", if_name);
            libc::close(sock);
            return;
        }
        ifr.ifr_ifru.ifru_flags |= libc::IFF_PROMISC as libc::c_short;
        if libc::ioctl(sock, libc::SIOCSIFFLAGS as libc::c_ulong, &mut ifr) < 0 {
            eprintln!("[BBO-NIC] WARNING: could not enable promiscuous mode on {}", if_name);
        } else {
            eprintln!("[BBO-NIC] Promiscuous mode enabled on {}", if_name);
        }
        libc::close(sock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_is_a_lifo_free_stack() {
        let mut slab = FrameSlab::new(4);
        let a = slab.alloc().unwrap();
        let b = slab.alloc().unwrap();
        assert_ne!(a, b);
        slab.free(a);
        assert_eq!(slab.alloc(), Some(a));
        // Drain completely.
        assert!(slab.alloc().is_some());
        assert!(slab.alloc().is_some());
        assert!(slab.alloc().is_some());
        assert_eq!(slab.alloc(), None);
    }
}
