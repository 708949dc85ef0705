//! Downlink Control Information records
//!
//! Field-level representation of the DCI formats the scheduler produces
//! (TS 38.212 7.3.1). These are values handed to the PHY for packing; bit
//! packing itself is not done here.

use crate::types::Rnti;
use serde::{Deserialize, Serialize};
use std::fmt;

/// DCI format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DciFormat {
    /// Fallback UL grant
    Format0_0,
    /// Non-fallback UL grant
    Format0_1,
    /// Fallback DL assignment
    #[default]
    Format1_0,
    /// Non-fallback DL assignment
    Format1_1,
    /// UL grant carried inside a Random Access Response
    Rar,
}

impl DciFormat {
    /// Fallback formats carry a reduced field set and fixed sizes
    pub fn is_fallback(&self) -> bool {
        matches!(self, DciFormat::Format0_0 | DciFormat::Format1_0)
    }
}

impl fmt::Display for DciFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DciFormat::Format0_0 => "0_0",
            DciFormat::Format0_1 => "0_1",
            DciFormat::Format1_0 => "1_0",
            DciFormat::Format1_1 => "1_1",
            DciFormat::Rar => "RAR",
        };
        f.write_str(s)
    }
}

/// Search space type a DCI is monitored in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchSpaceType {
    /// Type0 common, SIB1
    #[default]
    Common0,
    /// Type0A common, other SI
    Common0A,
    /// Type1 common, RAR and TC-RNTI
    Common1,
    /// Type2 common, paging
    Common2,
    /// Type3 common
    Common3,
    /// UE-specific search space
    UeSpecific,
    /// Pseudo search space of the RAR UL grant
    Rar,
}

impl SearchSpaceType {
    pub fn is_common(&self) -> bool {
        !matches!(self, SearchSpaceType::UeSpecific | SearchSpaceType::Rar)
    }
}

/// Kind of RNTI the DCI CRC is scrambled with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RntiType {
    /// Cell RNTI, an attached UE
    #[default]
    C,
    /// Random access RNTI
    Ra,
    /// Temporary cell RNTI, before contention resolution
    Tc,
    /// System information RNTI
    Si,
}

impl fmt::Display for RntiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RntiType::C => "c-rnti",
            RntiType::Ra => "ra-rnti",
            RntiType::Tc => "tc-rnti",
            RntiType::Si => "si-rnti",
        };
        f.write_str(s)
    }
}

/// PDCCH candidate position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DciLocation {
    /// Aggregation level index: 0..=4 for L = 1, 2, 4, 8, 16
    pub aggregation_level: u8,
    /// First CCE of the candidate
    pub ncce: u32,
}

impl DciLocation {
    /// Number of CCEs spanned by the candidate
    pub fn nof_cces(&self) -> u32 {
        1 << self.aggregation_level
    }
}

/// Addressing context of a DCI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DciContext {
    pub location: DciLocation,
    pub ss_type: SearchSpaceType,
    pub coreset_id: u8,
    /// First RB of the coreset, used by fallback formats in common search spaces
    pub coreset_start_rb: u32,
    pub rnti_type: RntiType,
    pub format: DciFormat,
    pub rnti: Rnti,
}

/// DL assignment (formats 1_0 / 1_1)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DciDl {
    pub ctx: DciContext,
    /// Bandwidth of CORESET#0, only present when CORESET#0 carries the DCI
    pub coreset0_bw: Option<u32>,
    pub freq_domain_assignment: u64,
    pub time_domain_assignment: u32,
    pub mcs: u32,
    pub ndi: bool,
    pub rv: u32,
    /// System information indicator, SI-RNTI only (0 = SIB1)
    pub sii: u32,
    pub pid: u32,
    pub dai: u32,
    pub tpc: u32,
    pub pucch_resource: u32,
    /// PDSCH-to-HARQ feedback timing indicator
    pub harq_feedback: u32,
    pub bwp_id: u8,
    pub cc_id: u32,
}

/// UL grant (formats 0_0 / 0_1 and the RAR grant)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DciUl {
    pub ctx: DciContext,
    pub freq_domain_assignment: u64,
    pub time_domain_assignment: u32,
    pub mcs: u32,
    pub ndi: bool,
    pub rv: u32,
    pub pid: u32,
    pub tpc: u32,
    pub bwp_id: u8,
    pub cc_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_formats() {
        assert!(DciFormat::Format1_0.is_fallback());
        assert!(DciFormat::Format0_0.is_fallback());
        assert!(!DciFormat::Format1_1.is_fallback());
        assert!(!DciFormat::Rar.is_fallback());
        assert_eq!(DciFormat::Format0_1.to_string(), "0_1");
    }

    #[test]
    fn test_location_cces() {
        let loc = DciLocation { aggregation_level: 3, ncce: 8 };
        assert_eq!(loc.nof_cces(), 8);
    }
}
