//! PRB grants
//!
//! Frequency domain resource allocations per TS 38.214 5.1.2.2: type 0
//! (bitmap over resource block groups) and type 1 (contiguous interval,
//! signalled as a resource indication value).

use common::utils::div_ceil;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of RBGs of a type 0 allocation (275 PRBs, P = 16)
pub const MAX_NOF_RBGS: usize = 18;

/// Contiguous PRB interval `[start, stop)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrbInterval {
    start: u32,
    stop: u32,
}

impl PrbInterval {
    pub fn new(start: u32, stop: u32) -> Self {
        debug_assert!(start <= stop, "invalid PRB interval [{}, {})", start, stop);
        Self { start, stop: stop.max(start) }
    }

    /// Interval of `length` PRBs starting at `start`
    pub fn with_length(start: u32, length: u32) -> Self {
        Self { start, stop: start + length }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn stop(&self) -> u32 {
        self.stop
    }

    pub fn length(&self) -> u32 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    pub fn contains(&self, prb: u32) -> bool {
        prb >= self.start && prb < self.stop
    }

    pub fn overlaps(&self, other: &PrbInterval) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// Resource indication value for a BWP of `nof_prb` RBs, `None` if the
    /// interval is empty or does not fit the BWP
    pub fn riv(&self, nof_prb: u32) -> Option<u32> {
        riv_encode(nof_prb, self.start, self.length())
    }
}

impl fmt::Display for PrbInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// Type 1 RIV (TS 38.214 5.1.2.2.2)
///
/// Requires `1 <= length <= nof_prb - start`.
pub fn riv_encode(nof_prb: u32, start: u32, length: u32) -> Option<u32> {
    if length == 0 || start >= nof_prb || length > nof_prb - start {
        return None;
    }
    let riv = if length - 1 <= nof_prb / 2 {
        nof_prb * (length - 1) + start
    } else {
        nof_prb * (nof_prb - length + 1) + (nof_prb - 1 - start)
    };
    Some(riv)
}

/// Inverse of [`riv_encode`]
pub fn riv_decode(riv: u32, nof_prb: u32) -> Option<PrbInterval> {
    if nof_prb == 0 {
        return None;
    }
    let high = riv / nof_prb;
    let low = riv % nof_prb;
    let (start, length) = if high + low < nof_prb {
        (low, high + 1)
    } else {
        (nof_prb - 1 - low, (nof_prb + 1).checked_sub(high)?)
    };
    // Values outside the codebook decode to an interval that does not re-encode
    if riv_encode(nof_prb, start, length) != Some(riv) {
        return None;
    }
    Some(PrbInterval::with_length(start, length))
}

/// RBG size configuration (PDSCH-Config rbg-Size)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RbgConfig {
    #[default]
    Config1,
    Config2,
}

/// Nominal RBG size P (TS 38.214 Table 5.1.2.2.1-1)
pub fn nominal_rbg_size(bwp_nof_prb: u32, config: RbgConfig) -> u32 {
    let (p1, p2) = match bwp_nof_prb {
        0..=36 => (2, 4),
        37..=72 => (4, 8),
        73..=144 => (8, 16),
        _ => (16, 16),
    };
    match config {
        RbgConfig::Config1 => p1,
        RbgConfig::Config2 => p2,
    }
}

/// Number of RBGs of a BWP: ceil((N_size + (N_start mod P)) / P)
pub fn nof_rbgs(bwp_start: u32, bwp_nof_prb: u32, rbg_size: u32) -> u32 {
    div_ceil(bwp_nof_prb + bwp_start % rbg_size, rbg_size)
}

/// Bitmap over RBGs, bit i set when RBG i is allocated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RbgBitmap {
    bits: u32,
    len: u8,
}

impl RbgBitmap {
    /// Empty bitmap of `len` RBGs
    pub fn new(len: usize) -> Option<Self> {
        if len > MAX_NOF_RBGS {
            return None;
        }
        Some(Self { bits: 0, len: len as u8 })
    }

    /// Bitmap of `len` RBGs from its integer form
    pub fn from_bits(len: usize, bits: u32) -> Option<Self> {
        let mut bitmap = Self::new(len)?;
        if len < 32 && bits >> len != 0 {
            return None;
        }
        bitmap.bits = bits;
        Some(bitmap)
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mark RBG `idx` as allocated; out of range indices are ignored
    pub fn set(&mut self, idx: usize) {
        if idx < self.len() {
            self.bits |= 1 << idx;
        }
    }

    pub fn test(&self, idx: usize) -> bool {
        idx < self.len() && self.bits & (1 << idx) != 0
    }

    /// Number of allocated RBGs
    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    pub fn none(&self) -> bool {
        self.bits == 0
    }

    /// The bitmap as an unsigned integer, bit i = RBG i
    pub fn to_uint64(&self) -> u64 {
        self.bits as u64
    }

    /// PRB usage of the BWP implied by this bitmap
    pub fn to_prb_mask(&self, bwp_start: u32, bwp_nof_prb: u32, rbg_size: u32) -> Vec<bool> {
        let offset = bwp_start % rbg_size;
        (0..bwp_nof_prb)
            .map(|prb| self.test(((prb + offset) / rbg_size) as usize))
            .collect()
    }
}

impl fmt::Display for RbgBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for idx in 0..self.len() {
            f.write_str(if self.test(idx) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// PRB allocation of a PDSCH/PUSCH, exactly one of the two layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrbGrant {
    /// Allocation type 0
    Rbgs(RbgBitmap),
    /// Allocation type 1
    Prbs(PrbInterval),
}

impl Default for PrbGrant {
    fn default() -> Self {
        PrbGrant::Prbs(PrbInterval::default())
    }
}

impl PrbGrant {
    /// Allocation type 0
    pub fn is_grouped(&self) -> bool {
        matches!(self, PrbGrant::Rbgs(_))
    }

    /// Allocation type 1
    pub fn is_contiguous(&self) -> bool {
        matches!(self, PrbGrant::Prbs(_))
    }

    pub fn rbgs(&self) -> Option<&RbgBitmap> {
        match self {
            PrbGrant::Rbgs(rbgs) => Some(rbgs),
            PrbGrant::Prbs(_) => None,
        }
    }

    pub fn prbs(&self) -> Option<&PrbInterval> {
        match self {
            PrbGrant::Prbs(prbs) => Some(prbs),
            PrbGrant::Rbgs(_) => None,
        }
    }

    /// RIV of a contiguous grant; `None` for grouped grants or intervals that
    /// do not fit `nof_prb`
    pub fn encode_riv(&self, nof_prb: u32) -> Option<u32> {
        self.prbs().and_then(|prbs| prbs.riv(nof_prb))
    }

    /// Frequency domain resource assignment field: the RBG bitmap for type 0,
    /// the RIV for type 1
    pub fn freq_domain_assignment(&self, nof_prb: u32) -> Option<u64> {
        match self {
            PrbGrant::Rbgs(rbgs) => Some(rbgs.to_uint64()),
            PrbGrant::Prbs(prbs) => prbs.riv(nof_prb).map(u64::from),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PrbGrant::Rbgs(rbgs) => rbgs.none(),
            PrbGrant::Prbs(prbs) => prbs.is_empty(),
        }
    }
}

impl From<PrbInterval> for PrbGrant {
    fn from(prbs: PrbInterval) -> Self {
        PrbGrant::Prbs(prbs)
    }
}

impl From<RbgBitmap> for PrbGrant {
    fn from(rbgs: RbgBitmap) -> Self {
        PrbGrant::Rbgs(rbgs)
    }
}

impl fmt::Display for PrbGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrbGrant::Rbgs(rbgs) => write!(f, "rbgs={}", rbgs),
            PrbGrant::Prbs(prbs) => write!(f, "{}", prbs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_riv_known_values() {
        // (l - 1) <= N/2 branch: 52 * 19 + 10
        assert_eq!(riv_encode(52, 10, 20), Some(998));
        // Full bandwidth uses the second branch: 52 * 1 + 51
        assert_eq!(riv_encode(52, 0, 52), Some(103));
        // Single PRB at the edge
        assert_eq!(riv_encode(52, 51, 1), Some(51));
        assert_eq!(riv_encode(52, 0, 10), Some(468));
    }

    #[test]
    fn test_riv_rejects_invalid_intervals() {
        assert_eq!(riv_encode(52, 0, 0), None);
        assert_eq!(riv_encode(52, 52, 1), None);
        assert_eq!(riv_encode(52, 40, 13), None);
        assert_eq!(riv_decode(5000, 52), None);
        assert_eq!(riv_decode(0, 0), None);
    }

    #[test]
    fn test_riv_is_injective_and_invertible() {
        for nof_prb in [1u32, 2, 11, 24, 51, 52, 106, 273] {
            let mut seen = HashSet::new();
            for start in 0..nof_prb {
                for length in 1..=(nof_prb - start) {
                    let riv = riv_encode(nof_prb, start, length).unwrap();
                    assert!(seen.insert(riv), "duplicate RIV {} for N={}", riv, nof_prb);
                    assert!(riv < nof_prb * (nof_prb + 1) / 2);
                    assert_eq!(riv_decode(riv, nof_prb), Some(PrbInterval::with_length(start, length)));
                }
            }
        }
    }

    #[test]
    fn test_rbg_size_table() {
        assert_eq!(nominal_rbg_size(24, RbgConfig::Config1), 2);
        assert_eq!(nominal_rbg_size(52, RbgConfig::Config1), 4);
        assert_eq!(nominal_rbg_size(52, RbgConfig::Config2), 8);
        assert_eq!(nominal_rbg_size(106, RbgConfig::Config1), 8);
        assert_eq!(nominal_rbg_size(273, RbgConfig::Config2), 16);
        assert_eq!(nof_rbgs(0, 52, 4), 13);
        assert_eq!(nof_rbgs(0, 273, 16), 18);
        // Misaligned BWP start adds a partial first RBG
        assert_eq!(nof_rbgs(2, 52, 4), 14);
    }

    #[test]
    fn test_rbg_bitmap() {
        let mut rbgs = RbgBitmap::new(13).unwrap();
        rbgs.set(0);
        rbgs.set(2);
        rbgs.set(12);
        rbgs.set(13);
        assert_eq!(rbgs.count(), 3);
        assert_eq!(rbgs.to_uint64(), 0b1_0000_0000_0101);
        assert_eq!(rbgs.to_string(), "1010000000001");
        assert!(RbgBitmap::new(19).is_none());
        assert!(RbgBitmap::from_bits(4, 0b10000).is_none());

        let mask = rbgs.to_prb_mask(0, 52, 4);
        assert_eq!(mask.iter().filter(|used| **used).count(), 12);
        assert!(mask[0] && mask[3] && !mask[4] && mask[8] && mask[51]);
    }

    #[test]
    fn test_grant_variants_are_exclusive() {
        let grouped = PrbGrant::from(RbgBitmap::from_bits(13, 0b11).unwrap());
        let contiguous = PrbGrant::from(PrbInterval::new(10, 30));
        for grant in [grouped, contiguous] {
            assert_ne!(grant.is_grouped(), grant.is_contiguous());
        }
        assert!(grouped.prbs().is_none());
        assert!(contiguous.rbgs().is_none());
        assert_eq!(grouped.encode_riv(52), None);
        assert_eq!(grouped.freq_domain_assignment(52), Some(3));
        assert_eq!(contiguous.freq_domain_assignment(52), Some(998));
    }

    #[test]
    fn test_interval_ops() {
        let a = PrbInterval::new(10, 30);
        assert_eq!(a.length(), 20);
        assert!(a.contains(10) && !a.contains(30));
        assert!(a.overlaps(&PrbInterval::new(29, 40)));
        assert!(!a.overlaps(&PrbInterval::new(30, 40)));
        assert_eq!(a.to_string(), "[10, 30)");
    }
}
