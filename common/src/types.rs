//! Common Types for the 5G NR MAC scheduler
//!
//! Defines fundamental identifiers and enumerations shared by the scheduler,
//! the PHY boundary and the binary.

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::fmt;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// SI-RNTI, fixed by TS 38.321 Table 7.1-1
    pub const SI: Self = Self(0xFFFF);
    /// First value of the C-RNTI/TC-RNTI range
    pub const FIRST_C_RNTI: Self = Self(0x4601);
    /// Last RA-RNTI value usable by PRACH occasions
    pub const MAX_RA_RNTI: Self = Self(0x40FF);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// RA-RNTI range (TS 38.321 7.1)
    pub fn is_ra_rnti(&self) -> bool {
        (0x0001..=Self::MAX_RA_RNTI.0).contains(&self.0)
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(pub u16);

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Parse from a value in kHz
    pub fn from_khz(khz: u32) -> Option<Self> {
        Self::from_u32(khz)
    }

    /// Numerology index mu (TS 38.211 Table 4.2-1)
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Inverse of [`SubcarrierSpacing::numerology`]
    pub fn from_numerology(mu: u8) -> Option<Self> {
        match mu {
            0 => Some(SubcarrierSpacing::Scs15),
            1 => Some(SubcarrierSpacing::Scs30),
            2 => Some(SubcarrierSpacing::Scs60),
            3 => Some(SubcarrierSpacing::Scs120),
            4 => Some(SubcarrierSpacing::Scs240),
            _ => None,
        }
    }

    /// Value in kHz
    pub fn khz(&self) -> u32 {
        *self as u32
    }
}

/// Bandwidth values in MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    /// 5 MHz
    Bw5,
    /// 10 MHz
    Bw10,
    /// 15 MHz
    Bw15,
    /// 20 MHz
    Bw20,
    /// 25 MHz
    Bw25,
    /// 30 MHz
    Bw30,
    /// 40 MHz
    Bw40,
    /// 50 MHz
    Bw50,
    /// 60 MHz
    Bw60,
    /// 80 MHz
    Bw80,
    /// 100 MHz
    Bw100,
}

impl Bandwidth {
    /// Parse from a value in MHz
    pub fn from_mhz(mhz: u32) -> Option<Self> {
        let bw = match mhz {
            5 => Bandwidth::Bw5,
            10 => Bandwidth::Bw10,
            15 => Bandwidth::Bw15,
            20 => Bandwidth::Bw20,
            25 => Bandwidth::Bw25,
            30 => Bandwidth::Bw30,
            40 => Bandwidth::Bw40,
            50 => Bandwidth::Bw50,
            60 => Bandwidth::Bw60,
            80 => Bandwidth::Bw80,
            100 => Bandwidth::Bw100,
            _ => return None,
        };
        Some(bw)
    }

    /// Get bandwidth in Hz
    pub fn as_hz(&self) -> u32 {
        match self {
            Bandwidth::Bw5 => 5_000_000,
            Bandwidth::Bw10 => 10_000_000,
            Bandwidth::Bw15 => 15_000_000,
            Bandwidth::Bw20 => 20_000_000,
            Bandwidth::Bw25 => 25_000_000,
            Bandwidth::Bw30 => 30_000_000,
            Bandwidth::Bw40 => 40_000_000,
            Bandwidth::Bw50 => 50_000_000,
            Bandwidth::Bw60 => 60_000_000,
            Bandwidth::Bw80 => 80_000_000,
            Bandwidth::Bw100 => 100_000_000,
        }
    }

    /// Maximum transmission bandwidth N_RB (TS 38.101-1 Table 5.3.2-1, FR1)
    pub fn max_nof_prb(&self, scs: SubcarrierSpacing) -> Option<u32> {
        use Bandwidth::*;
        use SubcarrierSpacing::*;
        let nrb = match (scs, self) {
            (Scs15, Bw5) => 25,
            (Scs15, Bw10) => 52,
            (Scs15, Bw15) => 79,
            (Scs15, Bw20) => 106,
            (Scs15, Bw25) => 133,
            (Scs15, Bw30) => 160,
            (Scs15, Bw40) => 216,
            (Scs15, Bw50) => 270,
            (Scs30, Bw5) => 11,
            (Scs30, Bw10) => 24,
            (Scs30, Bw15) => 38,
            (Scs30, Bw20) => 51,
            (Scs30, Bw25) => 65,
            (Scs30, Bw30) => 78,
            (Scs30, Bw40) => 106,
            (Scs30, Bw50) => 133,
            (Scs30, Bw60) => 162,
            (Scs30, Bw80) => 217,
            (Scs30, Bw100) => 273,
            _ => return None,
        };
        Some(nrb)
    }
}

/// Link direction of a grant or HARQ process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// PDSCH, scheduled by a DL DCI
    Downlink,
    /// PUSCH, scheduled by a UL DCI
    Uplink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Downlink => write!(f, "DL"),
            Direction::Uplink => write!(f, "UL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_bandwidth_conversion() {
        assert_eq!(Bandwidth::Bw20.as_hz(), 20_000_000);
        assert_eq!(Bandwidth::from_mhz(100), Some(Bandwidth::Bw100));
        assert_eq!(Bandwidth::from_mhz(7), None);
        assert_eq!(Bandwidth::Bw10.max_nof_prb(SubcarrierSpacing::Scs15), Some(52));
        assert_eq!(Bandwidth::Bw100.max_nof_prb(SubcarrierSpacing::Scs15), None);
    }

    #[test]
    fn test_scs_numerology() {
        assert_eq!(SubcarrierSpacing::from_khz(30), Some(SubcarrierSpacing::Scs30));
        assert_eq!(SubcarrierSpacing::from_khz(45), None);
        for mu in 0..5 {
            let scs = SubcarrierSpacing::from_numerology(mu).unwrap();
            assert_eq!(scs.numerology(), mu);
        }
    }

    #[test]
    fn test_rnti_ranges() {
        assert!(Rnti(0x0010).is_ra_rnti());
        assert!(!Rnti::FIRST_C_RNTI.is_ra_rnti());
        assert!(!Rnti::SI.is_ra_rnti());
        assert_eq!(Rnti(0x4601).to_string(), "0x4601");
    }
}
