//! Bandwidth part parameters
//!
//! Static configuration of the active BWP of a cell, read by the DCI builder
//! and the slot scheduler. Built once per cell and shared read-only.

use super::prb_grant::{nof_rbgs, nominal_rbg_size, PrbGrant, RbgConfig};
use super::SchedError;
use common::types::SubcarrierSpacing;
use interfaces::phy_config::{CoresetConfig, PdcchConfig, SearchSpaceConfig, RBS_PER_CORESET_BIT};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum number of PRBs of a carrier (TS 38.101-1)
pub const MAX_NOF_PRB: u32 = 275;

/// CORESET#0 configuration based on 3GPP TS 38.213
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coreset0Config {
    /// Number of resource blocks
    pub num_rbs: u32,
    /// Number of symbols
    pub num_symbols: u32,
    /// RB offset from point A
    pub rb_offset: u32,
}

impl Coreset0Config {
    /// Get CORESET#0 configuration from table index
    /// Based on 3GPP TS 38.213 Table 13-1 for {15, 15} kHz SCS and Table 13-4
    /// for {30, 30} kHz SCS
    pub fn from_index(scs: SubcarrierSpacing, index: u8) -> Result<Self, SchedError> {
        let config = match (scs, index) {
            (SubcarrierSpacing::Scs15, 0) => Self { num_rbs: 24, num_symbols: 2, rb_offset: 0 },
            (SubcarrierSpacing::Scs15, 1) => Self { num_rbs: 24, num_symbols: 2, rb_offset: 2 },
            (SubcarrierSpacing::Scs15, 2) => Self { num_rbs: 24, num_symbols: 2, rb_offset: 4 },
            (SubcarrierSpacing::Scs15, 3) => Self { num_rbs: 24, num_symbols: 3, rb_offset: 0 },
            (SubcarrierSpacing::Scs15, 4) => Self { num_rbs: 24, num_symbols: 3, rb_offset: 2 },
            (SubcarrierSpacing::Scs15, 5) => Self { num_rbs: 24, num_symbols: 3, rb_offset: 4 },
            (SubcarrierSpacing::Scs15, 6) => Self { num_rbs: 48, num_symbols: 1, rb_offset: 12 },
            (SubcarrierSpacing::Scs15, 7) => Self { num_rbs: 48, num_symbols: 1, rb_offset: 16 },
            (SubcarrierSpacing::Scs15, 8) => Self { num_rbs: 48, num_symbols: 2, rb_offset: 12 },
            (SubcarrierSpacing::Scs15, 9) => Self { num_rbs: 48, num_symbols: 2, rb_offset: 16 },
            (SubcarrierSpacing::Scs15, 10) => Self { num_rbs: 48, num_symbols: 3, rb_offset: 12 },
            (SubcarrierSpacing::Scs15, 11) => Self { num_rbs: 48, num_symbols: 3, rb_offset: 16 },
            (SubcarrierSpacing::Scs15, 12) => Self { num_rbs: 96, num_symbols: 1, rb_offset: 38 },
            (SubcarrierSpacing::Scs15, 13) => Self { num_rbs: 96, num_symbols: 2, rb_offset: 38 },
            (SubcarrierSpacing::Scs15, 14) => Self { num_rbs: 96, num_symbols: 3, rb_offset: 38 },
            (SubcarrierSpacing::Scs30, 0..=4) => Self { num_rbs: 24, num_symbols: 2, rb_offset: index as u32 },
            (SubcarrierSpacing::Scs30, 5..=9) => Self { num_rbs: 24, num_symbols: 3, rb_offset: index as u32 - 5 },
            (SubcarrierSpacing::Scs30, 10) => Self { num_rbs: 48, num_symbols: 1, rb_offset: 12 },
            (SubcarrierSpacing::Scs30, 11) => Self { num_rbs: 48, num_symbols: 1, rb_offset: 14 },
            (SubcarrierSpacing::Scs30, 12) => Self { num_rbs: 48, num_symbols: 1, rb_offset: 16 },
            (SubcarrierSpacing::Scs30, 13) => Self { num_rbs: 48, num_symbols: 2, rb_offset: 12 },
            (SubcarrierSpacing::Scs30, 14) => Self { num_rbs: 48, num_symbols: 2, rb_offset: 14 },
            (SubcarrierSpacing::Scs30, 15) => Self { num_rbs: 48, num_symbols: 2, rb_offset: 16 },
            (SubcarrierSpacing::Scs15 | SubcarrierSpacing::Scs30, _) => {
                return Err(SchedError::InvalidConfiguration(format!(
                    "Invalid CORESET#0 index {} for {} kHz",
                    index,
                    scs.khz()
                )))
            }
            _ => {
                return Err(SchedError::InvalidConfiguration(format!(
                    "No CORESET#0 table for {} kHz",
                    scs.khz()
                )))
            }
        };
        Ok(config)
    }

    /// CORESET#0 as a BWP CORESET definition
    pub fn to_coreset(&self) -> CoresetConfig {
        let nof_bits = self.num_rbs / RBS_PER_CORESET_BIT;
        CoresetConfig {
            id: 0,
            offset_rb: self.rb_offset,
            freq_resources: (1u64 << nof_bits) - 1,
            duration: self.num_symbols as u8,
        }
    }
}

/// Row of the PUSCH time domain allocation list used for Msg3
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuschRaTime {
    /// Slot offset K2
    pub k: u32,
    /// Start symbol S
    #[serde(default)]
    pub start_symbol: u8,
    /// Length in symbols L
    #[serde(default = "default_pusch_nof_symbols")]
    pub nof_symbols: u8,
}

fn default_pusch_nof_symbols() -> u8 {
    14
}

/// PUSCH time domain allocation with its derived Msg3 delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuschRaParams {
    pub k: u32,
    /// Slots between the RAR PDCCH and the Msg3 PUSCH: K2 + delta
    pub msg3_delay: u32,
    pub start_symbol: u8,
    pub nof_symbols: u8,
}

/// Msg3 delay delta (TS 38.214 Table 6.1.2.1.1-5)
pub fn msg3_delta(scs: SubcarrierSpacing) -> u32 {
    match scs {
        SubcarrierSpacing::Scs15 => 2,
        SubcarrierSpacing::Scs30 => 3,
        SubcarrierSpacing::Scs60 => 4,
        SubcarrierSpacing::Scs120 | SubcarrierSpacing::Scs240 => 6,
    }
}

/// BWP configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BwpConfig {
    /// BWP id
    #[serde(default)]
    pub bwp_id: u8,
    /// First CRB of the BWP
    #[serde(default)]
    pub start_rb: u32,
    /// Width of the BWP in RBs
    pub rb_width: u32,
    /// RBG size configuration for type 0 allocations
    #[serde(default)]
    pub rbg_config: RbgConfig,
    /// PDCCH configuration
    #[serde(default)]
    pub pdcch: PdcchConfig,
    /// PUSCH time domain allocations usable for Msg3
    #[serde(default = "default_pusch_ra_list")]
    pub pusch_ra_list: Vec<PuschRaTime>,
    /// PDCCH to PDSCH slot offset K0
    #[serde(default)]
    pub pdsch_k0: u32,
    /// PDSCH to HARQ-ACK slot offset K1
    #[serde(default = "default_harq_ack_k1")]
    pub harq_ack_k1: u32,
    /// PDCCH to PUSCH slot offset K2
    #[serde(default = "default_pusch_k2")]
    pub pusch_k2: u32,
}

fn default_pusch_ra_list() -> Vec<PuschRaTime> {
    vec![PuschRaTime { k: 4, start_symbol: 0, nof_symbols: 14 }]
}

fn default_harq_ack_k1() -> u32 {
    4
}

fn default_pusch_k2() -> u32 {
    4
}

impl BwpConfig {
    /// Default BWP spanning `rb_width` RBs
    pub fn new(rb_width: u32) -> Self {
        Self {
            bwp_id: 0,
            start_rb: 0,
            rb_width,
            rbg_config: RbgConfig::default(),
            pdcch: PdcchConfig::default(),
            pusch_ra_list: default_pusch_ra_list(),
            pdsch_k0: 0,
            harq_ack_k1: default_harq_ack_k1(),
            pusch_k2: default_pusch_k2(),
        }
    }
}

/// Derived, immutable BWP parameters of one carrier
#[derive(Debug, Clone)]
pub struct BwpParams {
    pub cc: u32,
    pub scs: SubcarrierSpacing,
    pub cfg: BwpConfig,
    /// Nominal RBG size P
    pub rbg_size: u32,
    pub nof_rbgs: u32,
    pub pusch_ra_list: Vec<PuschRaParams>,
}

impl BwpParams {
    pub fn new(cc: u32, scs: SubcarrierSpacing, cfg: BwpConfig) -> Result<Self, SchedError> {
        if cfg.rb_width == 0 || cfg.rb_width > MAX_NOF_PRB {
            return Err(SchedError::InvalidConfiguration(
                format!("Invalid BWP width: {} RBs", cfg.rb_width)
            ));
        }
        if cfg.harq_ack_k1 == 0 {
            return Err(SchedError::InvalidConfiguration("K1 must be at least 1 slot".into()));
        }
        cfg.pdcch
            .validate()
            .map_err(|e| SchedError::InvalidConfiguration(e.to_string()))?;

        let rbg_size = nominal_rbg_size(cfg.rb_width, cfg.rbg_config);
        let nof_rbgs = nof_rbgs(cfg.start_rb, cfg.rb_width, rbg_size);
        let delta = msg3_delta(scs);
        let pusch_ra_list = cfg
            .pusch_ra_list
            .iter()
            .map(|row| PuschRaParams {
                k: row.k,
                msg3_delay: row.k + delta,
                start_symbol: row.start_symbol,
                nof_symbols: row.nof_symbols,
            })
            .collect();

        debug!("BWP {} of cc={}: {} RBs, P={}, {} RBGs",
               cfg.bwp_id, cc, cfg.rb_width, rbg_size, nof_rbgs);

        Ok(Self { cc, scs, cfg, rbg_size, nof_rbgs, pusch_ra_list })
    }

    pub fn bwp_id(&self) -> u8 {
        self.cfg.bwp_id
    }

    pub fn rb_width(&self) -> u32 {
        self.cfg.rb_width
    }

    /// CORESET by id
    pub fn coreset(&self, id: u8) -> Result<&CoresetConfig, SchedError> {
        self.cfg.pdcch.coreset(id).ok_or(SchedError::MissingCoreset(id))
    }

    /// Search space by id
    pub fn search_space(&self, id: u32) -> Result<&SearchSpaceConfig, SchedError> {
        self.cfg.pdcch.search_space(id).ok_or(SchedError::MissingSearchSpace(id))
    }

    /// Cell RA search space
    pub fn ra_search_space(&self) -> Result<&SearchSpaceConfig, SchedError> {
        self.search_space(self.cfg.pdcch.ra_search_space_id)
    }

    /// Slots between a RAR PDCCH and its Msg3 PUSCH
    pub fn msg3_delay(&self) -> Result<u32, SchedError> {
        self.pusch_ra_list
            .first()
            .map(|row| row.msg3_delay)
            .ok_or(SchedError::MissingRaTimeConfig)
    }

    /// Whether the grant lies within the BWP
    pub fn grant_fits(&self, grant: &PrbGrant) -> bool {
        match grant {
            PrbGrant::Rbgs(rbgs) => rbgs.len() as u32 == self.nof_rbgs && !rbgs.none(),
            PrbGrant::Prbs(prbs) => !prbs.is_empty() && prbs.stop() <= self.rb_width(),
        }
    }

    /// PRB usage of `grant` over the BWP
    pub fn prb_mask(&self, grant: &PrbGrant) -> Vec<bool> {
        match grant {
            PrbGrant::Rbgs(rbgs) => rbgs.to_prb_mask(self.cfg.start_rb, self.rb_width(), self.rbg_size),
            PrbGrant::Prbs(prbs) => (0..self.rb_width()).map(|prb| prbs.contains(prb)).collect(),
        }
    }

    /// Number of PRBs of `grant`
    pub fn nof_prbs(&self, grant: &PrbGrant) -> u32 {
        self.prb_mask(grant).iter().filter(|used| **used).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::prb_grant::{PrbInterval, RbgBitmap};

    fn bwp52() -> BwpParams {
        BwpParams::new(0, SubcarrierSpacing::Scs15, BwpConfig::new(52)).unwrap()
    }

    #[test]
    fn test_coreset0_config() {
        // Test valid index
        let config = Coreset0Config::from_index(SubcarrierSpacing::Scs15, 1).unwrap();
        assert_eq!(config.num_rbs, 24);
        assert_eq!(config.num_symbols, 2);
        assert_eq!(config.rb_offset, 2);

        let coreset = config.to_coreset();
        assert_eq!(coreset.bandwidth(), 24);
        assert_eq!(coreset.offset_rb, 2);
        assert_eq!(coreset.duration, 2);

        // Test invalid index
        assert!(Coreset0Config::from_index(SubcarrierSpacing::Scs15, 20).is_err());
        assert!(Coreset0Config::from_index(SubcarrierSpacing::Scs15, 15).is_err());
    }

    #[test]
    fn test_coreset0_config_30khz() {
        let config = Coreset0Config::from_index(SubcarrierSpacing::Scs30, 1).unwrap();
        assert_eq!((config.num_rbs, config.num_symbols, config.rb_offset), (24, 2, 1));
        let config = Coreset0Config::from_index(SubcarrierSpacing::Scs30, 7).unwrap();
        assert_eq!((config.num_rbs, config.num_symbols, config.rb_offset), (24, 3, 2));
        let config = Coreset0Config::from_index(SubcarrierSpacing::Scs30, 15).unwrap();
        assert_eq!((config.num_rbs, config.num_symbols, config.rb_offset), (48, 2, 16));

        assert!(Coreset0Config::from_index(SubcarrierSpacing::Scs30, 16).is_err());
        // Only the {15, 15} and {30, 30} kHz tables are supported
        assert!(matches!(
            Coreset0Config::from_index(SubcarrierSpacing::Scs60, 0),
            Err(SchedError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_bwp_params_derivation() {
        let bwp = bwp52();
        assert_eq!(bwp.rbg_size, 4);
        assert_eq!(bwp.nof_rbgs, 13);
        assert_eq!(bwp.msg3_delay().unwrap(), 6);
        assert_eq!(bwp.ra_search_space().unwrap().coreset_id, 0);
        assert!(matches!(bwp.coreset(5), Err(SchedError::MissingCoreset(5))));

        let bwp30 = BwpParams::new(0, SubcarrierSpacing::Scs30, BwpConfig::new(51)).unwrap();
        assert_eq!(bwp30.msg3_delay().unwrap(), 7);
    }

    #[test]
    fn test_invalid_bwp_config() {
        assert!(BwpParams::new(0, SubcarrierSpacing::Scs15, BwpConfig::new(0)).is_err());
        assert!(BwpParams::new(0, SubcarrierSpacing::Scs15, BwpConfig::new(276)).is_err());

        let mut cfg = BwpConfig::new(52);
        cfg.pdcch.ra_search_space_id = 9;
        assert!(BwpParams::new(0, SubcarrierSpacing::Scs15, cfg).is_err());
    }

    #[test]
    fn test_missing_ra_time_config() {
        let mut cfg = BwpConfig::new(52);
        cfg.pusch_ra_list.clear();
        let bwp = BwpParams::new(0, SubcarrierSpacing::Scs15, cfg).unwrap();
        assert!(matches!(bwp.msg3_delay(), Err(SchedError::MissingRaTimeConfig)));
    }

    #[test]
    fn test_grant_fit_and_prb_count() {
        let bwp = bwp52();
        let prbs = PrbGrant::from(PrbInterval::new(10, 30));
        assert!(bwp.grant_fits(&prbs));
        assert_eq!(bwp.nof_prbs(&prbs), 20);
        assert!(!bwp.grant_fits(&PrbGrant::from(PrbInterval::new(40, 53))));
        assert!(!bwp.grant_fits(&PrbGrant::from(PrbInterval::new(4, 4))));

        let rbgs = PrbGrant::from(RbgBitmap::from_bits(13, 0b111).unwrap());
        assert!(bwp.grant_fits(&rbgs));
        assert_eq!(bwp.nof_prbs(&rbgs), 12);
        assert!(!bwp.grant_fits(&PrbGrant::from(RbgBitmap::from_bits(9, 1).unwrap())));
    }
}
