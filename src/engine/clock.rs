// BBO-RX — TSC CLOCK
// Replaces clock_gettime(MONOTONIC) in the hot loop with raw rdtsc.
// Calibrated once at boot against CLOCK_MONOTONIC, read-only afterwards.
//
// Two read variants, and the distinction is semantic:
//   rdtsc()  — unserialized, ~24 cycles. Used for reception timestamps; the
//              ±2ns out-of-order error is irrelevant there.
//   rdtscp() — serialized. Used for calibration and diagnostic intervals so
//              measurements are not polluted by out-of-order completion.

use std::time::Duration;

/// Kernel monotonic clock. Cold path and calibration only.
#[inline(always)]
pub fn clock_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

// ============================================================================
// RAW CYCLE READS (ARCHITECTURE-SPECIFIC)
// ============================================================================

/// Unserialized cycle read.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn rdtsc() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        core::arch::asm!(
            "rdtsc",
            out("eax") lo,
            out("edx") hi,
            options(nostack, nomem, preserves_flags)
        );
    }
    ((hi as u64) << 32) | (lo as u64)
}

/// Serialized cycle read: waits for all prior instructions to retire.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn rdtscp() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        core::arch::asm!(
            "rdtscp",
            out("eax") lo,
            out("edx") hi,
            out("ecx") _,
            options(nostack, nomem, preserves_flags)
        );
    }
    ((hi as u64) << 32) | (lo as u64)
}

/// ARM generic timer virtual count. Constant-rate, monotonic, unprivileged.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn rdtsc() -> u64 {
    let cnt: u64;
    unsafe {
        core::arch::asm!(
            "mrs {cnt}, CNTVCT_EL0",
            cnt = out(reg) cnt,
            options(nostack, nomem, preserves_flags)
        );
    }
    cnt
}

/// Serialized ARM read: isb drains the pipeline before the counter read.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn rdtscp() -> u64 {
    let cnt: u64;
    unsafe {
        core::arch::asm!(
            "isb",
            "mrs {cnt}, CNTVCT_EL0",
            cnt = out(reg) cnt,
            options(nostack, preserves_flags)
        );
    }
    cnt
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn rdtsc() -> u64 { clock_ns() }

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn rdtscp() -> u64 { clock_ns() }

// ============================================================================
// CALIBRATED CLOCK
// ============================================================================

/// Calibration window. 10ms gives ~100ppm-stable scale factors on an
/// invariant TSC.
pub const CALIBRATION_WINDOW_MS: u64 = 10;

/// Cycle-to-wall-clock conversion state. Written once by `calibrate()`,
/// read-only afterwards.
pub struct TscClock {
    ns_per_cycle: f64,
    cycles_per_ns: f64,
    base_tsc: u64,
}

impl TscClock {
    /// Block for the calibration window and derive the scale factors from
    /// the serialized cycle delta across the actually-elapsed monotonic
    /// interval. Returns None on a zero delta (broken counter or clock).
    pub fn calibrate() -> Option<TscClock> {
        warn_if_non_invariant_tsc();

        // Warm the code paths and caches before the timed section.
        for _ in 0..100 {
            let _ = rdtscp();
            let _ = clock_ns();
        }

        let tsc0 = rdtscp();
        let mono0 = clock_ns();
        std::thread::sleep(Duration::from_millis(CALIBRATION_WINDOW_MS));
        let tsc1 = rdtscp();
        let mono1 = clock_ns();

        let cycles = tsc1.wrapping_sub(tsc0);
        let ns = mono1.saturating_sub(mono0);
        if cycles == 0 || ns == 0 {
            eprintln!("[BBO-TSC] Calibration failed (zero delta over {}ms window)",
                CALIBRATION_WINDOW_MS);
            return None;
        }

        let ns_per_cycle = ns as f64 / cycles as f64;
        let clock = TscClock {
            ns_per_cycle,
            cycles_per_ns: cycles as f64 / ns as f64,
            base_tsc: rdtscp(),
        };
        eprintln!("[BBO-TSC] Calibrated: {:.3} GHz ({:.4} ns/cycle)",
            clock.ghz(), ns_per_cycle);
        Some(clock)
    }

    #[inline(always)]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (cycles as f64 * self.ns_per_cycle) as u64
    }

    #[inline(always)]
    pub fn ns_to_cycles(&self, ns: u64) -> u64 {
        (ns as f64 * self.cycles_per_ns) as u64
    }

    /// Nanoseconds since calibration. Serialized read.
    #[inline(always)]
    pub fn elapsed_ns(&self) -> u64 {
        self.cycles_to_ns(rdtscp().wrapping_sub(self.base_tsc))
    }

    /// Current time from a fresh serialized read, converted to nanoseconds.
    /// Per-core monotonic; comparable across cores only on invariant TSCs.
    #[inline(always)]
    pub fn now_ns(&self) -> u64 {
        self.cycles_to_ns(rdtscp())
    }

    pub fn ns_per_cycle(&self) -> f64 { self.ns_per_cycle }
    pub fn cycles_per_ns(&self) -> f64 { self.cycles_per_ns }

    /// Core frequency in GHz (cycles per nanosecond).
    pub fn ghz(&self) -> f64 { self.cycles_per_ns }
}

/// CPUID leaf 0x80000007 bit 8: invariant TSC. A non-invariant counter is
/// an operator misconfiguration (wrong governor, no isolation), not a fatal
/// condition here, so only warn.
#[cfg(target_arch = "x86_64")]
fn warn_if_non_invariant_tsc() {
    let has_invariant_tsc = unsafe {
        let result: u32;
        core::arch::asm!(
            "push rbx",
            "mov eax, 0x80000007",
            "cpuid",
            "pop rbx",
            out("edx") result,
            out("eax") _,
            out("ecx") _,
            options(nomem)
        );
        (result >> 8) & 1 == 1
    };
    if !has_invariant_tsc {
        eprintln!("[BBO-TSC] WARNING: CPU lacks invariant TSC; timestamps may drift across cores");
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn warn_if_non_invariant_tsc() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_produces_positive_scale() {
        let clock = TscClock::calibrate().expect("calibration");
        assert!(clock.ns_per_cycle() > 0.0);
        assert!(clock.cycles_per_ns() > 0.0);
        // ns_per_cycle and cycles_per_ns are reciprocal.
        let product = clock.ns_per_cycle() * clock.cycles_per_ns();
        assert!((product - 1.0).abs() < 1e-9);
    }

    #[test]
    fn conversions_round_trip_within_rounding() {
        let clock = TscClock::calibrate().expect("calibration");
        let cycles = clock.ns_to_cycles(1_000_000);
        let ns = clock.cycles_to_ns(cycles);
        // One cycle of rounding slack each way.
        assert!((ns as i64 - 1_000_000i64).abs() < 10);
    }

    #[test]
    fn now_ns_is_monotonic_on_one_core() {
        let clock = TscClock::calibrate().expect("calibration");
        let mut last = clock.now_ns();
        for _ in 0..10_000 {
            let now = clock.now_ns();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn serialized_read_advances() {
        let a = rdtscp();
        let b = rdtscp();
        assert!(b >= a);
    }
}
