// BBO-RX — KERNEL-BYPASS SUBSTRATE CONTRACT
// The receive engine is generic over this narrow seam: a burst pull of
// packet handles and a buffer release. Monomorphization keeps the calls
// free; no trait objects anywhere near the hot path.

pub mod frame;
pub mod sim;
pub mod xdp;

/// Burst ceiling. Deliberately below what the substrate can deliver:
/// smaller bursts bound worst-case batch service time, and this design
/// optimizes P99, not throughput.
pub const BURST_SIZE: usize = 32;

/// RX descriptor ring depth.
pub const RX_RING_SIZE: u32 = 1024;

/// Packet buffer pool depth (frames in the UMEM region).
pub const FRAME_COUNT: usize = 8192;

/// Bytes per packet buffer.
pub const FRAME_SIZE: u32 = 2048;

/// A received packet: stable data pointer, frame length, and an opaque
/// token the owning port uses to reclaim the buffer.
#[derive(Copy, Clone)]
pub struct PktHandle {
    pub data: *mut u8,
    pub len: u32,
    pub token: u64,
}

impl PktHandle {
    pub const EMPTY: PktHandle = PktHandle { data: std::ptr::null_mut(), len: 0, token: 0 };
}

/// One (port, queue) receive endpoint.
pub trait RxPort {
    /// Pull up to BURST_SIZE packets. Returns immediately with the count;
    /// zero means the queue was empty. Never blocks.
    fn rx_burst(&mut self, out: &mut [PktHandle; BURST_SIZE]) -> usize;

    /// Return a packet buffer to the port.
    fn release(&mut self, pkt: PktHandle);
}
