// BBO-RX — BBO RECORD
// Cache-line shaped value type for the hot path. Exactly 64 bytes, 64-byte
// aligned: one line fetch carries everything a trading decision needs.
//
// Fixed 8-byte symbol (the downstream consumer record widens to 16).
// Hardware timestamps are not carried here; they live in the optional
// annex and are extracted by cold-path code on demand.

use bytemuck::{Pod, Zeroable};

/// Status flag bits for `BboRecord::flags`.
pub mod flags {
    /// Payload carried the optional four-point hardware timestamps.
    pub const HAS_HW_TIMESTAMPS: u8 = 0x01;
    /// Record was produced by the synthetic warm-up path.
    pub const IS_SYNTHETIC: u8 = 0x02;
    /// Record may be outdated.
    pub const IS_STALE: u8 = 0x04;
}

/// Normalized top-of-book record. Host byte order, bit-identical layout
/// across instances; stored in slots that are never freed, only reused.
#[repr(C, align(64))]
#[derive(Copy, Clone)]
pub struct BboRecord {
    /// Ticker, space-padded, not null-terminated.
    pub symbol: [u8; 8],
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_shares: u32,
    pub ask_shares: u32,
    pub spread: f64,
    /// Reception timestamp (TSC-derived), nanoseconds.
    pub timestamp_ns: u64,
    pub sequence: u32,
    pub valid: u8,
    pub flags: u8,
    _pad: [u8; 10],
}

// SAFETY: repr(C) with explicit trailing padding; every field layout has no
// implicit padding and all bit patterns are valid.
unsafe impl Zeroable for BboRecord {}
unsafe impl Pod for BboRecord {}

const _: () = assert!(std::mem::size_of::<BboRecord>() == 64);
const _: () = assert!(std::mem::align_of::<BboRecord>() == 64);

impl BboRecord {
    /// Zero every byte, padding included.
    #[inline(always)]
    pub fn clear(&mut self) {
        *self = Self::zeroed();
    }

    /// Copy up to 8 symbol bytes and space-pad the remainder.
    #[inline(always)]
    pub fn set_symbol(&mut self, sym: &[u8]) {
        let n = sym.len().min(8);
        self.symbol[..n].copy_from_slice(&sym[..n]);
        for b in &mut self.symbol[n..] {
            *b = b' ';
        }
    }

    /// Symbol with trailing spaces and NULs stripped. Cold path only.
    pub fn symbol_trimmed(&self) -> String {
        let mut len = 8;
        while len > 0 && (self.symbol[len - 1] == b' ' || self.symbol[len - 1] == 0) {
            len -= 1;
        }
        String::from_utf8_lossy(&self.symbol[..len]).into_owned()
    }
}

// ============================================================================
// HARDWARE TIMESTAMP ANNEX (COLD PATH)
// ============================================================================

/// Hardware capture clock: 125 MHz RGMII domain, 8 ns per cycle.
const NS_PER_HW_CYCLE: f64 = 8.0;
const US_PER_NS: f64 = 0.001;

/// Four-point hardware timestamps from the tail of a full-size payload,
/// with the derived stage latencies. Never touched on the hot path.
#[derive(Copy, Clone, Default, Debug)]
pub struct HwTimestamps {
    pub t1: u32,
    pub t2: u32,
    pub t3: u32,
    pub t4: u32,
    pub latency_a_us: f64,
    pub latency_b_us: f64,
    pub total_us: f64,
}

impl HwTimestamps {
    pub fn compute_latencies(&mut self) {
        self.latency_a_us = (self.t2.wrapping_sub(self.t1)) as f64 * NS_PER_HW_CYCLE * US_PER_NS;
        self.latency_b_us = (self.t4.wrapping_sub(self.t3)) as f64 * NS_PER_HW_CYCLE * US_PER_NS;
        self.total_us = self.latency_a_us + self.latency_b_us;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_one_cache_line() {
        assert_eq!(std::mem::size_of::<BboRecord>(), 64);
        assert_eq!(std::mem::align_of::<BboRecord>(), 64);
    }

    #[test]
    fn symbol_round_trip_trims_padding() {
        let mut rec = BboRecord::zeroed();
        rec.set_symbol(b"AAPL");
        assert_eq!(&rec.symbol, b"AAPL    ");
        assert_eq!(rec.symbol_trimmed(), "AAPL");

        rec.set_symbol(b"GOOGLEMAX");
        assert_eq!(&rec.symbol, b"GOOGLEMA");
        assert_eq!(rec.symbol_trimmed(), "GOOGLEMA");
    }

    #[test]
    fn clear_restores_all_zero_bytes() {
        let mut rec = BboRecord::zeroed();
        rec.set_symbol(b"MSFT");
        rec.bid_price = 404.25;
        rec.valid = 1;
        rec.clear();
        assert!(bytemuck::bytes_of(&rec).iter().all(|&b| b == 0));
    }

    #[test]
    fn annex_latencies_at_8ns_per_cycle() {
        let mut ts = HwTimestamps { t1: 1, t2: 5, t3: 10, t4: 20, ..Default::default() };
        ts.compute_latencies();
        assert!((ts.latency_a_us - 0.032).abs() < 1e-12);
        assert!((ts.latency_b_us - 0.080).abs() < 1e-12);
        assert!((ts.total_us - 0.112).abs() < 1e-12);
    }
}
