//! Slot clock
//!
//! A [`SlotPoint`] identifies one slot within the hyperframe cycle of its
//! numerology (1024 SFNs x 10 subframes x 2^mu slots). All arithmetic and
//! ordering between slot points wraps around that period.

use crate::types::SubcarrierSpacing;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of system frame numbers in a hyperframe cycle
pub const NOF_SFNS: u32 = 1024;
/// Number of subframes (1 ms) per frame
pub const NOF_SUBFRAMES_PER_FRAME: u32 = 10;

/// Wrapping slot coordinate bound to its numerology
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPoint {
    scs: SubcarrierSpacing,
    count: u32,
}

impl SlotPoint {
    /// Create a slot point from an absolute slot count; the count wraps
    pub fn new(scs: SubcarrierSpacing, count: u32) -> Self {
        let period = Self::period(scs);
        Self { scs, count: count % period }
    }

    /// Create a slot point from SFN and slot index within the frame
    pub fn from_sfn(scs: SubcarrierSpacing, sfn: u32, slot_idx: u32) -> Option<Self> {
        let slots_per_frame = NOF_SUBFRAMES_PER_FRAME << scs.numerology();
        if sfn >= NOF_SFNS || slot_idx >= slots_per_frame {
            return None;
        }
        Some(Self { scs, count: sfn * slots_per_frame + slot_idx })
    }

    fn period(scs: SubcarrierSpacing) -> u32 {
        NOF_SFNS * (NOF_SUBFRAMES_PER_FRAME << scs.numerology())
    }

    /// Subcarrier spacing this slot point is counted in
    pub fn scs(&self) -> SubcarrierSpacing {
        self.scs
    }

    /// Numerology index mu
    pub fn numerology(&self) -> u8 {
        self.scs.numerology()
    }

    pub fn nof_slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    pub fn nof_slots_per_frame(&self) -> u32 {
        NOF_SUBFRAMES_PER_FRAME * self.nof_slots_per_subframe()
    }

    /// Slots in one hyperframe cycle, the wraparound period
    pub fn nof_slots_per_hf(&self) -> u32 {
        Self::period(self.scs)
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.count / self.nof_slots_per_frame()
    }

    /// Slot index within the frame
    pub fn slot_idx(&self) -> u32 {
        self.count % self.nof_slots_per_frame()
    }

    /// Subframe index within the frame
    pub fn subframe_idx(&self) -> u32 {
        self.slot_idx() / self.nof_slots_per_subframe()
    }

    /// Absolute slot count within the hyperframe cycle
    pub fn to_uint(&self) -> u32 {
        self.count
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: u32) -> SlotPoint {
        let period = self.nof_slots_per_hf();
        let count = (self.count + rhs % period) % period;
        SlotPoint { scs: self.scs, count }
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, rhs: u32) -> SlotPoint {
        let period = self.nof_slots_per_hf();
        let count = (self.count + period - rhs % period) % period;
        SlotPoint { scs: self.scs, count }
    }
}

/// Signed distance in slots, in `[-period/2, period/2)`
impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    fn sub(self, rhs: SlotPoint) -> i32 {
        debug_assert_eq!(self.scs, rhs.scs, "slot points of different numerologies");
        let period = self.nof_slots_per_hf() as i64;
        let mut diff = self.count as i64 - rhs.count as i64;
        if diff >= period / 2 {
            diff -= period;
        } else if diff < -(period / 2) {
            diff += period;
        }
        diff as i32
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.scs != other.scs {
            return None;
        }
        Some((*self - *other).cmp(&0))
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sfn(), self.slot_idx())
    }
}

impl fmt::Debug for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotPoint({}, mu={})", self, self.numerology())
    }
}
