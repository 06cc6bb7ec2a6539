// BBO-RX — BBO PAYLOAD PARSER
// Zero-copy parse of the BBO datagram into a pool slot. No string
// operations, no validation beyond the length gate, minimal branching.
// Symbol validation exists as a separate cold predicate for callers that
// want it; the hot path does not pay for it.

use std::ptr;

use crate::engine::hints::unlikely;
use crate::engine::pool::SlotPool;
use crate::protocol::bbo::{flags, BboRecord, HwTimestamps};

/// Prices arrive as big-endian u32 scaled by 10000. Multiplying by the
/// reciprocal is cheaper than dividing and the constant folds at compile
/// time.
pub const PRICE_MULTIPLIER: f64 = 0.0001;

/// Symbol(8) + five u32 fields(20).
pub const BBO_MIN_SIZE: usize = 28;
/// With the four-point hardware timestamps appended.
pub const BBO_FULL_SIZE: usize = 44;

// Payload layout offsets.
pub const SYMBOL_OFFSET: usize = 0;
pub const BID_PRICE_OFFSET: usize = 8;
pub const BID_SHARES_OFFSET: usize = 12;
pub const ASK_PRICE_OFFSET: usize = 16;
pub const ASK_SHARES_OFFSET: usize = 20;
pub const SPREAD_OFFSET: usize = 24;
pub const T1_OFFSET: usize = 28;

/// Unaligned big-endian u32 load; compiles to a single bswap'd mov.
#[inline(always)]
unsafe fn load_be32(p: *const u8) -> u32 {
    u32::from_be(ptr::read_unaligned(p as *const u32))
}

/// Parse a BBO payload into a freshly acquired pool slot.
///
/// Returns None for undersized payloads without touching the pool, so the
/// head counter never advances for a rejected packet. Bytes past
/// BBO_FULL_SIZE are ignored.
#[inline(always)]
pub fn parse<'a>(
    data: *const u8,
    len: usize,
    pool: &'a mut SlotPool,
    ts_ns: u64,
    sequence: u32,
) -> Option<&'a mut BboRecord> {
    if unlikely(len < BBO_MIN_SIZE) {
        return None;
    }

    let bbo = pool.acquire();

    unsafe {
        ptr::copy_nonoverlapping(data.add(SYMBOL_OFFSET), bbo.symbol.as_mut_ptr(), 8);

        let bid_raw = load_be32(data.add(BID_PRICE_OFFSET));
        let bid_shares = load_be32(data.add(BID_SHARES_OFFSET));
        let ask_raw = load_be32(data.add(ASK_PRICE_OFFSET));
        let ask_shares = load_be32(data.add(ASK_SHARES_OFFSET));
        let spread_raw = load_be32(data.add(SPREAD_OFFSET));

        bbo.bid_price = bid_raw as f64 * PRICE_MULTIPLIER;
        bbo.ask_price = ask_raw as f64 * PRICE_MULTIPLIER;
        bbo.spread = spread_raw as f64 * PRICE_MULTIPLIER;
        bbo.bid_shares = bid_shares;
        bbo.ask_shares = ask_shares;
    }

    bbo.timestamp_ns = ts_ns;
    bbo.sequence = sequence;
    bbo.valid = 1;
    bbo.flags = if len >= BBO_FULL_SIZE { flags::HAS_HW_TIMESTAMPS } else { 0 };

    Some(bbo)
}

/// Extract the hardware timestamps from a full-size payload. Zeroed result
/// when the payload does not carry them. Cold path by design.
#[cold]
#[inline(never)]
pub fn extract_timestamps(data: *const u8, len: usize) -> HwTimestamps {
    let mut ts = HwTimestamps::default();
    if len < BBO_FULL_SIZE {
        return ts;
    }
    unsafe {
        ts.t1 = load_be32(data.add(T1_OFFSET));
        ts.t2 = load_be32(data.add(T1_OFFSET + 4));
        ts.t3 = load_be32(data.add(T1_OFFSET + 8));
        ts.t4 = load_be32(data.add(T1_OFFSET + 12));
    }
    ts.compute_latencies();
    ts
}

/// Symbol sanity check without a full parse: all 8 bytes printable ASCII.
pub fn is_valid_bbo(data: &[u8]) -> bool {
    if data.len() < BBO_MIN_SIZE {
        return false;
    }
    data[..8].iter().all(|&c| (0x20..=0x7E).contains(&c))
}

/// Compare the on-wire symbol against a target prefix without parsing.
#[inline(always)]
pub fn symbol_matches(data: &[u8], target: &[u8]) -> bool {
    let n = target.len().min(8).min(data.len());
    data[..n] == target[..n]
}
