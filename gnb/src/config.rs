//! YAML Configuration Structures for srsRAN-compatible format
//!
//! Cell and PDCCH sections follow the srsRAN gNB YAML layout; the `sched`
//! section carries the MAC scheduler parameters.

use anyhow::{anyhow, Context};
use common::dci::{DciFormat, SearchSpaceType};
use common::types::{Bandwidth, Pci, SubcarrierSpacing};
use interfaces::phy_config::{CoresetConfig, RBS_PER_CORESET_BIT};
use layers::mac::bwp::Coreset0Config;
use layers::mac::prb_grant::RbgConfig;
use layers::mac::{BwpConfig, SchedConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure matching srsRAN YAML format
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GnbConfig {
    /// Cell configuration
    #[serde(default)]
    pub cell_cfg: CellConfig,
    /// Active BWP configuration
    #[serde(default)]
    pub bwp: BwpSection,
    /// Scheduler configuration
    #[serde(default)]
    pub sched: SchedSection,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Downlink ARFCN
    #[serde(default = "default_dl_arfcn")]
    pub dl_arfcn: u32,
    /// Band number
    #[serde(default = "default_band")]
    pub band: u16,
    /// Channel bandwidth in MHz
    #[serde(rename = "channel_bandwidth_MHz", default = "default_channel_bandwidth")]
    pub channel_bandwidth_mhz: u32,
    /// Common subcarrier spacing in kHz
    #[serde(default = "default_common_scs")]
    pub common_scs: u32,
    /// Physical Cell ID
    #[serde(default)]
    pub pci: u16,
    /// PDCCH configuration
    #[serde(default)]
    pub pdcch: PdcchSection,
}

fn default_dl_arfcn() -> u32 {
    368500 // Band 3 FDD, 1842.5 MHz
}

fn default_band() -> u16 {
    3
}

fn default_channel_bandwidth() -> u32 {
    10
}

fn default_common_scs() -> u32 {
    15
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            dl_arfcn: default_dl_arfcn(),
            band: default_band(),
            channel_bandwidth_mhz: default_channel_bandwidth(),
            common_scs: default_common_scs(),
            pci: 0,
            pdcch: PdcchSection::default(),
        }
    }
}

/// PDCCH configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PdcchSection {
    /// Common PDCCH configuration
    #[serde(default)]
    pub common: CommonPdcchConfig,
    /// Dedicated PDCCH configuration
    #[serde(default)]
    pub dedicated: DedicatedPdcchConfig,
}

/// Common PDCCH configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommonPdcchConfig {
    /// Search space 0 index
    #[serde(default)]
    pub ss0_index: u8,
    /// CORESET#0 index
    #[serde(default = "default_coreset0_index")]
    pub coreset0_index: u8,
}

fn default_coreset0_index() -> u8 {
    1
}

impl Default for CommonPdcchConfig {
    fn default() -> Self {
        Self { ss0_index: 0, coreset0_index: default_coreset0_index() }
    }
}

/// Dedicated PDCCH configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DedicatedPdcchConfig {
    /// Search space 2 type
    #[serde(default = "default_ss2_type")]
    pub ss2_type: String,
    /// DCI format 0_1 and 1_1 enabled
    #[serde(default)]
    pub dci_format_0_1_and_1_1: bool,
}

fn default_ss2_type() -> String {
    "common".to_string()
}

impl Default for DedicatedPdcchConfig {
    fn default() -> Self {
        Self { ss2_type: default_ss2_type(), dci_format_0_1_and_1_1: false }
    }
}

/// BWP section, the BWP spans the carrier unless `rb_width` is set
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BwpSection {
    #[serde(default)]
    pub bwp_id: u8,
    /// Width in RBs, starting at the first RB of the carrier
    #[serde(default)]
    pub rb_width: Option<u32>,
    /// RBG size configuration for type 0 allocations
    #[serde(default)]
    pub rbg_config: RbgConfig,
    /// PUSCH time domain offset K2 of Msg3, before the numerology delta
    #[serde(default = "default_msg3_k2")]
    pub msg3_k2: u32,
}

fn default_msg3_k2() -> u32 {
    4
}

impl Default for BwpSection {
    fn default() -> Self {
        Self { bwp_id: 0, rb_width: None, rbg_config: RbgConfig::default(), msg3_k2: default_msg3_k2() }
    }
}

/// Scheduler section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedSection {
    #[serde(flatten)]
    pub core: SchedConfig,
    /// PDSCH to HARQ-ACK offset K1 in slots
    #[serde(default = "default_harq_ack_k1")]
    pub harq_ack_k1: u32,
    /// PDCCH to PUSCH offset K2 in slots
    #[serde(default = "default_pusch_k2")]
    pub pusch_k2: u32,
}

fn default_harq_ack_k1() -> u32 {
    4
}

fn default_pusch_k2() -> u32 {
    4
}

impl Default for SchedSection {
    fn default() -> Self {
        Self {
            core: SchedConfig::default(),
            harq_ack_k1: default_harq_ack_k1(),
            pusch_k2: default_pusch_k2(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// All layers log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// MAC layer log level
    #[serde(default = "default_log_level")]
    pub mac_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { all_level: default_log_level(), mac_level: default_log_level() }
    }
}

impl LogConfig {
    /// Tracing filter directive for these levels
    pub fn filter_directive(&self) -> String {
        format!("{},layers::mac={}", self.all_level, self.mac_level)
    }
}

impl GnbConfig {
    /// Load configuration from a YAML file, or TOML when the extension is
    /// `.toml`
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn pci(&self) -> anyhow::Result<Pci> {
        Pci::new(self.cell_cfg.pci).ok_or_else(|| anyhow!("Invalid PCI: {}", self.cell_cfg.pci))
    }

    pub fn scs(&self) -> anyhow::Result<SubcarrierSpacing> {
        SubcarrierSpacing::from_khz(self.cell_cfg.common_scs)
            .ok_or_else(|| anyhow!("Invalid subcarrier spacing: {} kHz", self.cell_cfg.common_scs))
    }

    /// Carrier width in PRBs
    pub fn nof_prb(&self) -> anyhow::Result<u32> {
        let mhz = self.cell_cfg.channel_bandwidth_mhz;
        let bandwidth = Bandwidth::from_mhz(mhz).ok_or_else(|| anyhow!("Invalid bandwidth: {} MHz", mhz))?;
        let scs = self.scs()?;
        bandwidth
            .max_nof_prb(scs)
            .ok_or_else(|| anyhow!("{} MHz is not supported at {} kHz", mhz, scs.khz()))
    }

    /// BWP spanning the carrier, with CORESET#0 from its table index and a
    /// dedicated CORESET#1 for search space 2
    pub fn bwp_config(&self) -> anyhow::Result<BwpConfig> {
        let nof_prb = self.nof_prb()?;
        let pdcch = &self.cell_cfg.pdcch;
        if pdcch.common.ss0_index > 15 {
            return Err(anyhow!("Invalid SearchSpace#0 index: {}", pdcch.common.ss0_index));
        }

        let rb_width = match self.bwp.rb_width {
            Some(width) if width > nof_prb => {
                return Err(anyhow!("BWP of {} RBs exceeds the {} PRB carrier", width, nof_prb));
            }
            Some(width) => width,
            None => nof_prb,
        };

        let mut bwp = BwpConfig::new(rb_width);
        bwp.bwp_id = self.bwp.bwp_id;
        bwp.rbg_config = self.bwp.rbg_config;
        bwp.harq_ack_k1 = self.sched.harq_ack_k1;
        bwp.pusch_k2 = self.sched.pusch_k2;
        for row in &mut bwp.pusch_ra_list {
            row.k = self.bwp.msg3_k2;
        }

        let coreset0 = Coreset0Config::from_index(self.scs()?, pdcch.common.coreset0_index)?;
        if coreset0.rb_offset + coreset0.num_rbs > rb_width {
            return Err(anyhow!(
                "CORESET#0 index {} ({} RBs at offset {}) exceeds {} RBs",
                pdcch.common.coreset0_index, coreset0.num_rbs, coreset0.rb_offset, rb_width
            ));
        }

        let nof_bits = (rb_width / RBS_PER_CORESET_BIT).min(8);
        let coreset1 = CoresetConfig {
            id: 1,
            offset_rb: 0,
            freq_resources: (1u64 << nof_bits) - 1,
            // At least 8 CCEs on narrow BWPs
            duration: if nof_bits >= 8 { 1 } else { 2 },
        };
        bwp.pdcch.coresets = vec![coreset0.to_coreset(), coreset1];

        let ss2 = bwp
            .pdcch
            .search_spaces
            .iter_mut()
            .find(|ss| ss.id == 2)
            .ok_or_else(|| anyhow!("Search space 2 missing"))?;
        match pdcch.dedicated.ss2_type.as_str() {
            "common" => ss2.ss_type = SearchSpaceType::Common3,
            "ue_dedicated" => {
                ss2.ss_type = SearchSpaceType::UeSpecific;
                if pdcch.dedicated.dci_format_0_1_and_1_1 {
                    ss2.formats = vec![DciFormat::Format0_1, DciFormat::Format1_1];
                }
            }
            other => return Err(anyhow!("Invalid ss2_type: {}", other)),
        }

        Ok(bwp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
cell_cfg:
  dl_arfcn: 368500
  band: 3
  channel_bandwidth_MHz: 10
  common_scs: 15
  pci: 1
  pdcch:
    common:
      ss0_index: 0
      coreset0_index: 1
    dedicated:
      ss2_type: ue_dedicated
      dci_format_0_1_and_1_1: true

bwp:
  rb_width: 40
  rbg_config: Config2
  msg3_k2: 3

sched:
  nof_harq_procs: 8
  max_retx: 3
  harq_ack_k1: 5
  sib1:
    mcs: 4

log:
  all_level: warn
  mac_level: debug
"#;

    #[test]
    fn test_parse_yaml() {
        let cfg = GnbConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(cfg.cell_cfg.channel_bandwidth_mhz, 10);
        assert_eq!(cfg.pci().unwrap().0, 1);
        assert_eq!(cfg.sched.core.nof_harq_procs, 8);
        assert_eq!(cfg.sched.core.max_retx, 3);
        assert_eq!(cfg.sched.harq_ack_k1, 5);
        assert_eq!(cfg.sched.pusch_k2, 4);
        let sib1 = cfg.sched.core.sib1.as_ref().unwrap();
        assert_eq!(sib1.mcs, 4);
        assert_eq!(sib1.period_ms, 160);
        assert_eq!(cfg.log.filter_directive(), "warn,layers::mac=debug");
    }

    #[test]
    fn test_bwp_from_cell_config() {
        let cfg = GnbConfig::from_yaml_str(SAMPLE).unwrap();
        let bwp = cfg.bwp_config().unwrap();
        assert_eq!(bwp.rb_width, 40);
        assert_eq!(bwp.rbg_config, RbgConfig::Config2);
        assert_eq!(bwp.harq_ack_k1, 5);
        assert_eq!(bwp.pusch_ra_list[0].k, 3);

        let cs0 = bwp.pdcch.coreset(0).unwrap();
        assert_eq!(cs0.bandwidth(), 24);
        assert_eq!(cs0.offset_rb, 2);
        assert_eq!(bwp.pdcch.coreset(1).unwrap().nof_cces(), 12);

        let ss2 = bwp.pdcch.search_space(2).unwrap();
        assert_eq!(ss2.ss_type, SearchSpaceType::UeSpecific);
        assert!(ss2.formats.contains(&DciFormat::Format1_1));
    }

    #[test]
    fn test_defaults() {
        let cfg = GnbConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg.scs().unwrap(), SubcarrierSpacing::Scs15);
        assert_eq!(cfg.nof_prb().unwrap(), 52);
        assert_eq!(cfg.sched.core, SchedConfig::default());
        let bwp = cfg.bwp_config().unwrap();
        assert_eq!(bwp.pdcch.search_space(2).unwrap().ss_type, SearchSpaceType::Common3);
    }

    #[test]
    fn test_parse_toml() {
        let cfg = GnbConfig::from_toml_str(
            r#"
[cell_cfg]
channel_bandwidth_MHz = 20
common_scs = 30

[sched]
max_retx = 2
"#,
        )
        .unwrap();
        assert_eq!(cfg.nof_prb().unwrap(), 51);
        assert_eq!(cfg.sched.core.max_retx, 2);
        // SIB1 stays on when the sched section leaves it out
        assert_eq!(cfg.sched.core.sib1, SchedConfig::default().sib1);

        // CORESET#0 from the 30 kHz table
        let bwp = cfg.bwp_config().unwrap();
        let cs0 = bwp.pdcch.coreset(0).unwrap();
        assert_eq!((cs0.offset_rb, cs0.bandwidth(), cs0.duration), (1, 24, 2));
    }

    #[test]
    fn test_sib1_disabled_by_null() {
        let cfg = GnbConfig::from_yaml_str("sched:\n  max_retx: 2\n").unwrap();
        assert!(cfg.sched.core.sib1.is_some());
        let cfg = GnbConfig::from_yaml_str("sched:\n  max_retx: 2\n  sib1: null\n").unwrap();
        assert_eq!(cfg.sched.core.max_retx, 2);
        assert!(cfg.sched.core.sib1.is_none());
    }

    #[test]
    fn test_coreset0_outside_30khz_bwp() {
        let mut cfg = GnbConfig::default();
        cfg.cell_cfg.common_scs = 30;
        cfg.cell_cfg.channel_bandwidth_mhz = 10;
        // 48 RBs at offset 16 do not fit the 24 PRB carrier
        cfg.cell_cfg.pdcch.common.coreset0_index = 12;
        assert!(cfg.bwp_config().is_err());
        cfg.cell_cfg.pdcch.common.coreset0_index = 15;
        assert!(cfg.bwp_config().is_err());
        cfg.cell_cfg.pdcch.common.coreset0_index = 16;
        assert!(cfg.bwp_config().is_err());

        cfg.cell_cfg.common_scs = 60;
        cfg.cell_cfg.channel_bandwidth_mhz = 20;
        cfg.cell_cfg.pdcch.common.coreset0_index = 0;
        assert!(cfg.bwp_config().is_err());
    }

    #[test]
    fn test_invalid_cell_config() {
        let mut cfg = GnbConfig::default();
        cfg.cell_cfg.pdcch.common.coreset0_index = 20;
        assert!(cfg.bwp_config().is_err());

        let mut cfg = GnbConfig::default();
        cfg.cell_cfg.pdcch.dedicated.ss2_type = "bogus".into();
        assert!(cfg.bwp_config().is_err());

        let mut cfg = GnbConfig::default();
        cfg.cell_cfg.common_scs = 45;
        assert!(cfg.nof_prb().is_err());

        let mut cfg = GnbConfig::default();
        cfg.bwp.rb_width = Some(60);
        assert!(cfg.bwp_config().is_err());

        let mut cfg = GnbConfig::default();
        cfg.cell_cfg.pci = 1008;
        assert!(cfg.pci().is_err());
    }
}
