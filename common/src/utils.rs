//! Common Utilities
//!
//! Small numeric helpers used across the scheduler

/// Smallest `n` with `2^n >= value`
pub fn ceil_log2(value: u64) -> u32 {
    if value <= 1 {
        return 0;
    }
    64 - (value - 1).leading_zeros()
}

/// Number of bits of a type-1 frequency domain resource assignment for a
/// BWP of `nof_prb` RBs: ceil(log2(N(N+1)/2))
pub fn riv_field_bits(nof_prb: u32) -> u32 {
    let n = nof_prb as u64;
    ceil_log2(n * (n + 1) / 2)
}

/// Integer division rounding up
pub fn div_ceil(a: u32, b: u32) -> u32 {
    a / b + u32::from(a % b != 0)
}

/// Time utilities for slot/frame calculations
pub mod time {
    use crate::types::SubcarrierSpacing;
    use std::time::Duration;

    /// Slot duration as a [`Duration`], exact for every numerology
    pub fn slot_duration(scs: SubcarrierSpacing) -> Duration {
        Duration::from_nanos(1_000_000 >> scs.numerology())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubcarrierSpacing;

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(16), 4);
        assert_eq!(ceil_log2(17), 5);
    }

    #[test]
    fn test_riv_field_bits() {
        // 52 PRBs: 52*53/2 = 1378 -> 11 bits
        assert_eq!(riv_field_bits(52), 11);
        // 106 PRBs: 5671 -> 13 bits
        assert_eq!(riv_field_bits(106), 13);
        // 24 PRBs (CORESET#0): 300 -> 9 bits
        assert_eq!(riv_field_bits(24), 9);
    }

    #[test]
    fn test_slot_duration() {
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs15).as_micros(), 1000);
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs120).as_micros(), 125);
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs240).as_nanos(), 62_500);
    }
}
