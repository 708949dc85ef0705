//! PDCCH configuration and DCI context resolution
//!
//! Based on 3GPP TS 38.213 clause 10.1 (search spaces) and TS 38.331
//! PDCCH-Config. The scheduler does not own this configuration: it asks a
//! [`DciContextProvider`] which DCI format, search space type and RNTI type a
//! PDCCH candidate implies for a given UE.

use crate::InterfaceError;
use common::dci::{DciContext, DciFormat, DciLocation, RntiType, SearchSpaceType};
use common::types::{Direction, Rnti};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Number of RBs per CORESET frequency resource bit
pub const RBS_PER_CORESET_BIT: u32 = 6;
/// REGs per CCE
const REGS_PER_CCE: u32 = 6;
/// Number of aggregation levels (1, 2, 4, 8, 16)
pub const NOF_AGGREGATION_LEVELS: usize = 5;

/// CORESET configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoresetConfig {
    /// CORESET id (0 is CORESET#0)
    pub id: u8,
    /// First RB of the CORESET, relative to the BWP
    #[serde(default)]
    pub offset_rb: u32,
    /// Frequency domain resources, bit i set for RBs [6i, 6i + 6)
    pub freq_resources: u64,
    /// Duration in OFDM symbols (1-3)
    #[serde(default = "default_coreset_duration")]
    pub duration: u8,
}

fn default_coreset_duration() -> u8 {
    1
}

impl CoresetConfig {
    /// CORESET bandwidth in RBs
    pub fn bandwidth(&self) -> u32 {
        self.freq_resources.count_ones() * RBS_PER_CORESET_BIT
    }

    /// Number of CCEs in the CORESET
    pub fn nof_cces(&self) -> u32 {
        self.bandwidth() * self.duration as u32 / REGS_PER_CCE
    }
}

/// Search space configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpaceConfig {
    /// Search space id
    pub id: u32,
    /// CORESET the search space is mapped to
    pub coreset_id: u8,
    /// Search space type
    pub ss_type: SearchSpaceType,
    /// DCI formats monitored in this search space
    #[serde(default = "default_ss_formats")]
    pub formats: Vec<DciFormat>,
    /// Number of candidates per aggregation level
    #[serde(default = "default_nof_candidates")]
    pub nof_candidates: [u8; NOF_AGGREGATION_LEVELS],
}

fn default_ss_formats() -> Vec<DciFormat> {
    vec![DciFormat::Format0_0, DciFormat::Format1_0]
}

fn default_nof_candidates() -> [u8; NOF_AGGREGATION_LEVELS] {
    [0, 0, 1, 0, 0]
}

/// PDCCH configuration of a BWP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcchConfig {
    /// Configured CORESETs
    pub coresets: Vec<CoresetConfig>,
    /// Configured search spaces
    pub search_spaces: Vec<SearchSpaceConfig>,
    /// Search space used for RAR and TC-RNTI scheduling
    pub ra_search_space_id: u32,
}

impl Default for PdcchConfig {
    /// CORESET#0 of 24 RBs x 2 symbols carrying the common search spaces and a
    /// 48 RB CORESET#1 for the UE-specific search space
    fn default() -> Self {
        Self {
            coresets: vec![
                CoresetConfig { id: 0, offset_rb: 0, freq_resources: 0b1111, duration: 2 },
                CoresetConfig { id: 1, offset_rb: 0, freq_resources: 0xFF, duration: 1 },
            ],
            search_spaces: vec![
                SearchSpaceConfig {
                    id: 0,
                    coreset_id: 0,
                    ss_type: SearchSpaceType::Common0,
                    formats: vec![DciFormat::Format1_0],
                    nof_candidates: [0, 0, 4, 2, 1],
                },
                SearchSpaceConfig {
                    id: 1,
                    coreset_id: 0,
                    ss_type: SearchSpaceType::Common1,
                    formats: default_ss_formats(),
                    nof_candidates: [0, 0, 4, 2, 1],
                },
                SearchSpaceConfig {
                    id: 2,
                    coreset_id: 1,
                    ss_type: SearchSpaceType::UeSpecific,
                    formats: default_ss_formats(),
                    nof_candidates: [0, 2, 2, 1, 0],
                },
            ],
            ra_search_space_id: 1,
        }
    }
}

impl PdcchConfig {
    /// Look up a CORESET by id
    pub fn coreset(&self, id: u8) -> Option<&CoresetConfig> {
        self.coresets.iter().find(|cs| cs.id == id)
    }

    /// Whether CORESET#0 is configured
    pub fn coreset0_present(&self) -> bool {
        self.coreset(0).is_some()
    }

    /// Look up a search space by id
    pub fn search_space(&self, id: u32) -> Option<&SearchSpaceConfig> {
        self.search_spaces.iter().find(|ss| ss.id == id)
    }

    /// The RA search space, if configured
    pub fn ra_search_space(&self) -> Option<&SearchSpaceConfig> {
        self.search_space(self.ra_search_space_id)
    }

    /// Check cross references between search spaces and CORESETs
    pub fn validate(&self) -> Result<(), InterfaceError> {
        for ss in &self.search_spaces {
            if self.coreset(ss.coreset_id).is_none() {
                return Err(InterfaceError::InvalidConfig(format!(
                    "search space {} references missing CORESET {}",
                    ss.id, ss.coreset_id
                )));
            }
        }
        if self.ra_search_space().is_none() {
            return Err(InterfaceError::UnknownSearchSpace(self.ra_search_space_id));
        }
        Ok(())
    }
}

/// Resolves the DCI context of a PDCCH candidate
///
/// Implemented by the PHY configuration of a UE. The returned context carries
/// the DCI format, search space type and RNTI type the candidate implies.
pub trait DciContextProvider {
    /// Context of a C-RNTI DCI scheduling `direction` data on candidate
    /// `location` of search space `ss_id`
    fn candidate_context(
        &self,
        direction: Direction,
        ss_id: u32,
        location: DciLocation,
        rnti: Rnti,
    ) -> Result<DciContext, InterfaceError>;

    /// Search space this UE monitors for RAR and TC-RNTI DCIs
    fn ra_search_space(&self) -> Option<&SearchSpaceConfig>;
}

/// Per-UE PHY configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UePhyConfig {
    pub pdcch: PdcchConfig,
}

impl UePhyConfig {
    pub fn new(pdcch: PdcchConfig) -> Self {
        Self { pdcch }
    }

    fn select_format(ss: &SearchSpaceConfig, direction: Direction) -> Option<DciFormat> {
        let (fallback, non_fallback) = match direction {
            Direction::Downlink => (DciFormat::Format1_0, DciFormat::Format1_1),
            Direction::Uplink => (DciFormat::Format0_0, DciFormat::Format0_1),
        };
        // Non-fallback formats are only monitored in UE-specific search spaces
        if ss.ss_type == SearchSpaceType::UeSpecific && ss.formats.contains(&non_fallback) {
            Some(non_fallback)
        } else if ss.formats.contains(&fallback) {
            Some(fallback)
        } else {
            None
        }
    }
}

impl DciContextProvider for UePhyConfig {
    fn candidate_context(
        &self,
        direction: Direction,
        ss_id: u32,
        location: DciLocation,
        rnti: Rnti,
    ) -> Result<DciContext, InterfaceError> {
        let ss = self
            .pdcch
            .search_space(ss_id)
            .ok_or(InterfaceError::UnknownSearchSpace(ss_id))?;
        let coreset = self
            .pdcch
            .coreset(ss.coreset_id)
            .ok_or(InterfaceError::UnknownCoreset(ss.coreset_id))?;

        let level = location.aggregation_level as usize;
        if level >= NOF_AGGREGATION_LEVELS || ss.nof_candidates[level] == 0 {
            return Err(InterfaceError::InvalidCandidate(format!(
                "ss={} has no candidates for aggregation level index {}",
                ss_id, location.aggregation_level
            )));
        }
        let nof_cces = location.nof_cces();
        let out_of_coreset = location
            .ncce
            .checked_add(nof_cces)
            .map_or(true, |end| end > coreset.nof_cces());
        if location.ncce % nof_cces != 0 || out_of_coreset {
            return Err(InterfaceError::InvalidCandidate(format!(
                "ncce={} L={} does not fit CORESET {} with {} CCEs",
                location.ncce,
                nof_cces,
                coreset.id,
                coreset.nof_cces()
            )));
        }

        let format = Self::select_format(ss, direction).ok_or_else(|| {
            InterfaceError::InvalidCandidate(format!("ss={} does not monitor any {} format", ss_id, direction))
        })?;

        trace!("Resolved candidate ss={} ncce={} rnti={} -> format {}", ss_id, location.ncce, rnti, format);

        Ok(DciContext {
            location,
            ss_type: ss.ss_type,
            coreset_id: coreset.id,
            coreset_start_rb: coreset.offset_rb,
            rnti_type: RntiType::C,
            format,
            rnti,
        })
    }

    fn ra_search_space(&self) -> Option<&SearchSpaceConfig> {
        self.pdcch.ra_search_space()
    }
}
