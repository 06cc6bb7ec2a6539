// BBO-RX — WIRE PROTOCOL
// Canonical definitions for the headers walked on the hot path.
// All header structs are #[repr(C, packed)] for zero-copy casts from the
// receive buffer; multi-byte fields hold network byte order as stored on
// the wire and are converted at the point of use.

use std::mem;
use bytemuck::{Pod, Zeroable};

// ============================================================================
// WIRE CONSTANTS
// ============================================================================

/// EtherType for IPv4, host order. Compare against `ethertype` with `.to_be()`.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// IPv4 protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;

// ============================================================================
// WIRE HEADERS
// ============================================================================

/// IEEE 802.3 Ethernet header. 14 bytes on wire: dst(6) + src(6) + ethertype(2).
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct EthernetHeader {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ethertype: u16,
}

/// IPv4 header without options. The real header length on a received frame
/// is `(version_ihl & 0x0F) * 4`; never assume 20.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct Ipv4Header {
    pub version_ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub id: u16,
    pub frag_off: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

/// UDP header. 8 bytes. `dgram_len` covers header + payload.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub dgram_len: u16,
    pub checksum: u16,
}

// ============================================================================
// DERIVED CONSTANTS
// ============================================================================

pub const ETH_HDR_SIZE: usize = mem::size_of::<EthernetHeader>();
pub const IPV4_HDR_MIN_SIZE: usize = mem::size_of::<Ipv4Header>();
pub const UDP_HDR_SIZE: usize = mem::size_of::<UdpHeader>();

/// Smallest frame the header walk can read without running off the buffer.
pub const MIN_PARSE_FRAME: usize = ETH_HDR_SIZE + IPV4_HDR_MIN_SIZE + UDP_HDR_SIZE;

const _: () = assert!(ETH_HDR_SIZE == 14);
const _: () = assert!(IPV4_HDR_MIN_SIZE == 20);
const _: () = assert!(UDP_HDR_SIZE == 8);
const _: () = assert!(MIN_PARSE_FRAME == 42);
