//! MAC Scheduler Implementation
//!
//! Turns the per-slot decisions of the allocation policy into HARQ state and
//! DCIs. Each pass loads the HARQ processes of the scheduled UEs, builds the
//! DCIs through the DCI builder and writes PDCCHs, PDSCHs, PUSCHs and
//! HARQ-ACK occasions into the resource grid. A grant that fails is dropped,
//! its HARQ process rolled back, and the pass continues with the next one.

use super::bwp::BwpParams;
use super::dci_builder::{fill_dci_msg3, fill_dci_rar, fill_dci_si, fill_dl_dci_ue_fields, fill_ul_dci_ue_fields, RAR_MCS};
use super::diagnostics::{log_sched_bwp_result, log_sched_slot_ues, SlotUeMap};
use super::harq::{DEFAULT_MAX_RETX, DEFAULT_NOF_HARQS};
use super::prb_grant::{PrbGrant, PrbInterval};
use super::res_grid::BwpResGrid;
use super::slot_ue::SchedUe;
use super::SchedError;
use common::dci::{DciLocation, RntiType};
use common::slot::SlotPoint;
use common::types::{Direction, Rnti};
use interfaces::message_types::{HarqAckOccasion, PdcchDl, PdcchUl, RarAlloc, RarGrant, SchAlloc, SlotResult};
use interfaces::phy_config::DciContextProvider;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Maximum number of HARQ processes (4 bit HARQ process number field)
pub const MAX_NOF_HARQS: usize = 16;

/// SIB1 broadcast configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sib1SchedConfig {
    /// First PRB of the SIB1 PDSCH
    #[serde(default)]
    pub start_rb: u32,
    /// Number of PRBs of the SIB1 PDSCH
    #[serde(default = "default_sib1_nof_rb")]
    pub nof_rb: u32,
    #[serde(default = "default_sib1_mcs")]
    pub mcs: u32,
    /// Transport block size in bits
    #[serde(default = "default_sib1_tbs")]
    pub tbs: u32,
    /// SIB1 periodicity in ms
    #[serde(default = "default_sib1_period_ms")]
    pub period_ms: u32,
    /// PDCCH candidate in the type-0 common search space
    #[serde(default = "default_sib1_location")]
    pub location: DciLocation,
}

fn default_sib1_nof_rb() -> u32 {
    10
}

fn default_sib1_mcs() -> u32 {
    2
}

fn default_sib1_tbs() -> u32 {
    // Typical SIB1 size of 100 bytes
    800
}

fn default_sib1_period_ms() -> u32 {
    160
}

fn default_sib1_location() -> DciLocation {
    DciLocation { aggregation_level: 2, ncce: 0 }
}

impl Default for Sib1SchedConfig {
    fn default() -> Self {
        Self {
            start_rb: 0,
            nof_rb: default_sib1_nof_rb(),
            mcs: default_sib1_mcs(),
            tbs: default_sib1_tbs(),
            period_ms: default_sib1_period_ms(),
            location: default_sib1_location(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedConfig {
    /// HARQ processes per UE and direction
    #[serde(default = "default_nof_harq_procs")]
    pub nof_harq_procs: usize,
    /// Maximum number of retransmissions of a TB
    #[serde(default = "default_max_retx")]
    pub max_retx: u32,
    /// SIB1 broadcast, disabled by an explicit null
    #[serde(default = "default_sib1")]
    pub sib1: Option<Sib1SchedConfig>,
}

fn default_nof_harq_procs() -> usize {
    DEFAULT_NOF_HARQS
}

fn default_max_retx() -> u32 {
    DEFAULT_MAX_RETX
}

fn default_sib1() -> Option<Sib1SchedConfig> {
    Some(Sib1SchedConfig::default())
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            nof_harq_procs: default_nof_harq_procs(),
            max_retx: default_max_retx(),
            sib1: default_sib1(),
        }
    }
}

/// Purpose of a C-RNTI/TC-RNTI grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrantKind {
    /// Data grant of a connected UE
    #[default]
    Data,
    /// Msg3 retransmission, DCI 0_0 with TC-RNTI
    Msg3,
}

/// Transport block of a new transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbParams {
    pub mcs: u32,
    /// Transport block size in bits
    pub tbs: u32,
}

/// A grant decided by the allocation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeGrant {
    pub rnti: Rnti,
    pub direction: Direction,
    pub kind: GrantKind,
    pub pid: u32,
    /// PRBs of a new transmission; retransmissions reuse the HARQ grant
    pub grant: PrbGrant,
    /// New data, `None` for a retransmission
    pub new_data: Option<TbParams>,
    pub ss_id: u32,
    pub location: DciLocation,
    pub lcids: Vec<u32>,
}

/// Msg3 grant carried by a RAR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg3Decision {
    pub tc_rnti: Rnti,
    pub preamble_idx: u32,
    pub ta_cmd: u32,
    pub pid: u32,
    pub interval: PrbInterval,
    pub mcs: u32,
    pub tbs: u32,
}

/// RAR decided by the allocation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarDecision {
    pub ra_rnti: Rnti,
    pub interval: PrbInterval,
    pub location: DciLocation,
    /// RAR transport block size in bits
    pub tbs: u32,
    pub msg3: Vec<Msg3Decision>,
}

/// Everything the allocation policy decided for one PDCCH slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotDecisions {
    pub ue_grants: Vec<UeGrant>,
    pub rars: Vec<RarDecision>,
}

/// Outcome of one scheduling pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotReport {
    pub nof_dl: usize,
    pub nof_ul: usize,
    pub nof_rar: usize,
    pub nof_msg3: usize,
    pub si: bool,
    /// Grants dropped because they could not be built
    pub nof_failed: usize,
}

/// HARQ processes bound to a UE in the current pass
#[derive(Debug, Clone, Copy, Default)]
struct BoundHarqs {
    dl: Option<u32>,
    ul: Option<u32>,
    msg3_delay: Option<u32>,
}

/// MAC scheduler
pub struct MacScheduler {
    cfg: SchedConfig,
    bwp: Arc<BwpParams>,
    ues: BTreeMap<Rnti, SchedUe>,
    grid: BwpResGrid,
}

impl MacScheduler {
    /// Create a new MAC scheduler
    pub fn new(bwp: BwpParams, cfg: SchedConfig) -> Result<Self, SchedError> {
        if cfg.nof_harq_procs == 0 || cfg.nof_harq_procs > MAX_NOF_HARQS {
            return Err(SchedError::InvalidConfiguration(
                format!("Invalid number of HARQ processes: {}", cfg.nof_harq_procs)
            ));
        }
        if let Some(sib1) = &cfg.sib1 {
            if sib1.period_ms == 0 || sib1.period_ms % 10 != 0 {
                return Err(SchedError::InvalidConfiguration(
                    format!("Invalid SIB1 period: {} ms", sib1.period_ms)
                ));
            }
            if !bwp.grant_fits(&PrbInterval::with_length(sib1.start_rb, sib1.nof_rb).into()) {
                return Err(SchedError::InvalidConfiguration("SIB1 PRBs exceed the BWP".into()));
            }
        }

        info!("MAC scheduler for cc={}: {} RBs, {} HARQs, max_retx={}",
              bwp.cc, bwp.rb_width(), cfg.nof_harq_procs, cfg.max_retx);

        let grid = BwpResGrid::new(bwp.cc);
        Ok(Self {
            cfg,
            bwp: Arc::new(bwp),
            ues: BTreeMap::new(),
            grid,
        })
    }

    pub fn config(&self) -> &SchedConfig {
        &self.cfg
    }

    pub fn bwp(&self) -> &BwpParams {
        &self.bwp
    }

    pub fn grid(&self) -> &BwpResGrid {
        &self.grid
    }

    /// Register a UE, on RACH with its TC-RNTI
    pub fn add_ue(&mut self, rnti: Rnti, phy: Arc<dyn DciContextProvider + Send + Sync>) -> Result<(), SchedError> {
        if self.ues.contains_key(&rnti) {
            return Err(SchedError::DuplicateUe(rnti));
        }
        let ue = SchedUe::new(rnti, self.bwp.cc, phy, self.cfg.nof_harq_procs, self.cfg.max_retx);
        self.ues.insert(rnti, ue);
        info!("SCHED: Added UE rnti={}", rnti);
        Ok(())
    }

    pub fn rem_ue(&mut self, rnti: Rnti) -> bool {
        let removed = self.ues.remove(&rnti).is_some();
        if removed {
            info!("SCHED: Removed UE rnti={}", rnti);
        }
        removed
    }

    pub fn ue(&self, rnti: Rnti) -> Option<&SchedUe> {
        self.ues.get(&rnti)
    }

    pub fn ues(&self) -> impl Iterator<Item = &SchedUe> {
        self.ues.values()
    }

    pub fn nof_ues(&self) -> usize {
        self.ues.len()
    }

    fn ue_mut(&mut self, rnti: Rnti) -> Result<&mut SchedUe, SchedError> {
        self.ues.get_mut(&rnti).ok_or(SchedError::UnknownUe(rnti))
    }

    /// Pending DL bytes of a UE
    pub fn dl_buffer_state(&mut self, rnti: Rnti, bytes: u32) -> Result<(), SchedError> {
        self.ue_mut(rnti)?.set_dl_bytes(bytes);
        Ok(())
    }

    /// Buffer status report of a UE
    pub fn ul_bsr(&mut self, rnti: Rnti, bytes: u32) -> Result<(), SchedError> {
        self.ue_mut(rnti)?.set_ul_bytes(bytes);
        Ok(())
    }

    /// HARQ-ACK feedback for a PDSCH, returns the acknowledged TBS
    pub fn dl_ack_info(&mut self, rnti: Rnti, pid: u32, ack: bool) -> Result<Option<u32>, SchedError> {
        let tbs = self.ue_mut(rnti)?.harq.ack_info(Direction::Downlink, pid, ack)?;
        debug!("SCHED: DL ACK rnti={} pid={} ack={}", rnti, pid, ack);
        Ok(tbs)
    }

    /// PUSCH decoding result, returns the received TBS
    pub fn ul_crc_info(&mut self, rnti: Rnti, pid: u32, crc: bool) -> Result<Option<u32>, SchedError> {
        let tbs = self.ue_mut(rnti)?.harq.ack_info(Direction::Uplink, pid, crc)?;
        debug!("SCHED: UL CRC rnti={} pid={} crc={}", rnti, pid, crc);
        Ok(tbs)
    }

    /// Hand the result of `slot` to the PHY
    pub fn take_slot_result(&mut self, slot: SlotPoint) -> Result<SlotResult, SchedError> {
        self.grid.take(slot)
    }

    /// Whether SIB1 is broadcast in `slot`
    ///
    /// SIB1 goes out 2 slots after the SSB of the first frame of its period.
    pub fn is_sib1_slot(&self, slot: SlotPoint) -> bool {
        match &self.cfg.sib1 {
            Some(sib1) => {
                let period_slots = sib1.period_ms * slot.nof_slots_per_subframe();
                slot.to_uint() % period_slots == 2
            }
            None => false,
        }
    }

    /// Run the scheduling pass of `pdcch_slot`
    pub fn run_slot(&mut self, pdcch_slot: SlotPoint, decisions: &SlotDecisions) -> SlotReport {
        let mut report = SlotReport::default();
        let mut bound: BTreeMap<Rnti, BoundHarqs> = BTreeMap::new();
        // One grant per UE and direction in a slot
        let mut seen = HashSet::new();

        self.grid.new_slot(pdcch_slot);
        for ue in self.ues.values_mut() {
            ue.harq.new_slot(pdcch_slot);
        }

        if self.is_sib1_slot(pdcch_slot) {
            match self.schedule_sib1(pdcch_slot) {
                Ok(()) => report.si = true,
                Err(e) => {
                    error!("SCHED: Failed to allocate SIB1 in slot {}: {}", pdcch_slot, e);
                    report.nof_failed += 1;
                }
            }
        }

        for rar in &decisions.rars {
            match self.schedule_rar(pdcch_slot, rar) {
                Ok(msg3_rntis) => {
                    report.nof_rar += 1;
                    report.nof_msg3 += msg3_rntis.len();
                    report.nof_failed += rar.msg3.len() - msg3_rntis.len();
                    for (rnti, pid) in msg3_rntis {
                        seen.insert((rnti, Direction::Uplink));
                        let entry = bound.entry(rnti).or_default();
                        entry.ul = Some(pid);
                        entry.msg3_delay = self.bwp.msg3_delay().ok();
                    }
                }
                Err(e) => {
                    error!("SCHED: Failed to allocate RAR ra-rnti={} in slot {}: {}", rar.ra_rnti, pdcch_slot, e);
                    report.nof_failed += rar.msg3.len().max(1);
                }
            }
        }

        for grant in &decisions.ue_grants {
            let result = if seen.contains(&(grant.rnti, grant.direction)) {
                Err(SchedError::DuplicateGrant { rnti: grant.rnti, direction: grant.direction })
            } else {
                self.schedule_ue_grant(pdcch_slot, grant)
            };
            match result {
                Ok(()) => {
                    seen.insert((grant.rnti, grant.direction));
                    let entry = bound.entry(grant.rnti).or_default();
                    match grant.direction {
                        Direction::Downlink => {
                            entry.dl = Some(grant.pid);
                            report.nof_dl += 1;
                        }
                        Direction::Uplink => {
                            entry.ul = Some(grant.pid);
                            report.nof_ul += 1;
                        }
                    }
                }
                Err(e) => {
                    error!("SCHED: Dropped {} grant of rnti={} pid={} in slot {}: {}",
                           grant.direction, grant.rnti, grant.pid, pdcch_slot, e);
                    report.nof_failed += 1;
                }
            }
        }

        self.log_slot(pdcch_slot, &bound);
        report
    }

    fn log_slot(&self, pdcch_slot: SlotPoint, bound: &BTreeMap<Rnti, BoundHarqs>) {
        let mut slot_ues = SlotUeMap::new();
        for (rnti, ue) in &self.ues {
            let mut slot_ue = ue.make_slot_ue(pdcch_slot, &self.bwp);
            if let Some(b) = bound.get(rnti) {
                slot_ue.h_dl = b.dl.and_then(|pid| ue.harq().get(Direction::Downlink, pid).ok());
                slot_ue.h_ul = b.ul.and_then(|pid| ue.harq().get(Direction::Uplink, pid).ok());
                if let Some(delay) = b.msg3_delay {
                    slot_ue = slot_ue.with_msg3_delay(delay);
                }
            }
            slot_ues.insert(*rnti, slot_ue);
        }
        log_sched_slot_ues(pdcch_slot, self.bwp.cc, &slot_ues);
        log_sched_bwp_result(pdcch_slot, &self.grid, &slot_ues, &self.bwp);
    }

    fn check_writable(grid: &BwpResGrid, slots: &[SlotPoint]) -> Result<(), SchedError> {
        match slots.iter().find(|slot| !grid.is_writable(**slot)) {
            Some(slot) => Err(SchedError::SlotClosed(*slot)),
            None => Ok(()),
        }
    }

    fn schedule_sib1(&mut self, pdcch_slot: SlotPoint) -> Result<(), SchedError> {
        let sib1 = self.cfg.sib1.clone().ok_or_else(|| SchedError::InvalidConfiguration("SIB1 not configured".into()))?;
        let interval = PrbInterval::with_length(sib1.start_rb, sib1.nof_rb);
        let mut dci = fill_dci_si(interval, 0, sib1.mcs, &self.bwp)?;
        dci.ctx.location = sib1.location;

        let pdsch_slot = pdcch_slot + self.bwp.cfg.pdsch_k0;
        Self::check_writable(&self.grid, &[pdcch_slot, pdsch_slot])?;

        let pdsch = SchAlloc {
            rnti: Rnti::SI,
            rnti_type: RntiType::Si,
            pid: 0,
            prb_mask: self.bwp.prb_mask(&interval.into()),
            mcs: sib1.mcs,
            tbs: sib1.tbs,
            rv: dci.rv,
            ndi: false,
            lcids: Vec::new(),
        };
        self.grid.slot_mut(pdcch_slot)?.dl.pdcch_dl.push(PdcchDl { dci });
        self.grid.slot_mut(pdsch_slot)?.dl.pdsch.push(pdsch);
        Ok(())
    }

    /// RAR and its Msg3 grants; returns the TC-RNTIs and pids of the Msg3s
    /// that made it into the RAR
    fn schedule_rar(&mut self, pdcch_slot: SlotPoint, rar: &RarDecision) -> Result<Vec<(Rnti, u32)>, SchedError> {
        let bwp = Arc::clone(&self.bwp);
        if !rar.ra_rnti.is_ra_rnti() {
            return Err(SchedError::InvalidGrant(format!("{} is not an RA-RNTI", rar.ra_rnti)));
        }
        let mut dci = fill_dci_rar(rar.interval, rar.ra_rnti, &bwp)?;
        dci.ctx.location = rar.location;

        let pdsch_slot = pdcch_slot + bwp.cfg.pdsch_k0;
        let pusch_slot = pdcch_slot + bwp.msg3_delay()?;
        Self::check_writable(&self.grid, &[pdcch_slot, pdsch_slot, pusch_slot])?;

        let mut grants = Vec::new();
        let mut puschs = Vec::new();
        let mut scheduled = Vec::new();
        for msg3 in &rar.msg3 {
            match self.schedule_msg3(pdcch_slot, msg3, &bwp) {
                Ok((grant, pusch)) => {
                    scheduled.push((msg3.tc_rnti, msg3.pid));
                    grants.push(grant);
                    puschs.push(pusch);
                }
                Err(e) => {
                    error!("SCHED: Dropped Msg3 of tc-rnti={} in RAR ra-rnti={}: {}", msg3.tc_rnti, rar.ra_rnti, e);
                }
            }
        }
        if grants.is_empty() {
            return Err(SchedError::EmptyRar(rar.ra_rnti));
        }

        let pdsch = SchAlloc {
            rnti: rar.ra_rnti,
            rnti_type: RntiType::Ra,
            pid: 0,
            prb_mask: bwp.prb_mask(&rar.interval.into()),
            mcs: RAR_MCS,
            tbs: rar.tbs,
            rv: dci.rv,
            ndi: false,
            lcids: Vec::new(),
        };
        let dl = &mut self.grid.slot_mut(pdcch_slot)?.dl;
        dl.pdcch_dl.push(PdcchDl { dci });
        dl.rar.push(RarAlloc { ra_rnti: rar.ra_rnti, grants });
        self.grid.slot_mut(pdsch_slot)?.dl.pdsch.push(pdsch);
        self.grid.slot_mut(pusch_slot)?.ul.pusch.extend(puschs);
        Ok(scheduled)
    }

    fn schedule_msg3(
        &mut self,
        pdcch_slot: SlotPoint,
        msg3: &Msg3Decision,
        bwp: &BwpParams,
    ) -> Result<(RarGrant, SchAlloc), SchedError> {
        let grant = PrbGrant::from(msg3.interval);
        if !bwp.grant_fits(&grant) {
            return Err(SchedError::InvalidGrant(format!("Msg3 PRBs {} exceed the BWP", msg3.interval)));
        }
        let msg3_delay = bwp.msg3_delay()?;
        let ue = self.ues.get_mut(&msg3.tc_rnti).ok_or(SchedError::UnknownUe(msg3.tc_rnti))?;
        let backup = ue.harq.get(Direction::Uplink, msg3.pid)?.clone();

        let result = Self::build_msg3(ue, pdcch_slot, msg3, grant, msg3_delay, bwp);
        if result.is_err() {
            ue.harq.restore(Direction::Uplink, backup);
        }
        result
    }

    fn build_msg3(
        ue: &mut SchedUe,
        pdcch_slot: SlotPoint,
        msg3: &Msg3Decision,
        grant: PrbGrant,
        msg3_delay: u32,
        bwp: &BwpParams,
    ) -> Result<(RarGrant, SchAlloc), SchedError> {
        ue.harq.load_new_transmission(Direction::Uplink, msg3.pid, grant, msg3.mcs, msg3.tbs)?;

        let (msg3_dci, pusch, pusch_slot) = {
            let slot_ue = ue
                .make_slot_ue(pdcch_slot, bwp)
                .with_msg3_delay(msg3_delay)
                .with_harq(ue.harq(), Direction::Uplink, msg3.pid)?;
            let msg3_dci = fill_dci_msg3(&slot_ue, bwp)?;
            let pusch = SchAlloc {
                rnti: msg3.tc_rnti,
                rnti_type: RntiType::Tc,
                pid: msg3.pid,
                prb_mask: bwp.prb_mask(&grant),
                mcs: msg3.mcs,
                tbs: msg3.tbs,
                rv: msg3_dci.rv,
                ndi: msg3_dci.ndi,
                lcids: Vec::new(),
            };
            (msg3_dci, pusch, slot_ue.pusch_slot)
        };
        ue.harq.set_tx_slots(Direction::Uplink, msg3.pid, pusch_slot, pusch_slot)?;

        let rar_grant = RarGrant {
            preamble_idx: msg3.preamble_idx,
            ta_cmd: msg3.ta_cmd,
            tc_rnti: msg3.tc_rnti,
            msg3_dci,
        };
        Ok((rar_grant, pusch))
    }

    fn schedule_ue_grant(&mut self, pdcch_slot: SlotPoint, grant: &UeGrant) -> Result<(), SchedError> {
        let bwp = Arc::clone(&self.bwp);
        if grant.new_data.is_some() && !bwp.grant_fits(&grant.grant) {
            return Err(SchedError::InvalidGrant(format!("{} does not fit the BWP", grant.grant)));
        }
        if grant.kind == GrantKind::Msg3 && grant.direction != Direction::Uplink {
            return Err(SchedError::InvalidGrant("Msg3 grants are UL only".into()));
        }

        let ue = self.ues.get_mut(&grant.rnti).ok_or(SchedError::UnknownUe(grant.rnti))?;
        let backup = ue.harq.get(grant.direction, grant.pid)?.clone();

        let result = Self::build_ue_grant(&mut self.grid, ue, &bwp, pdcch_slot, grant);
        if result.is_err() {
            ue.harq.restore(grant.direction, backup);
        }
        result
    }

    fn build_ue_grant(
        grid: &mut BwpResGrid,
        ue: &mut SchedUe,
        bwp: &BwpParams,
        pdcch_slot: SlotPoint,
        grant: &UeGrant,
    ) -> Result<(), SchedError> {
        let direction = grant.direction;
        match grant.new_data {
            Some(tb) => {
                ue.harq.load_new_transmission(direction, grant.pid, grant.grant, tb.mcs, tb.tbs)?;
            }
            None => {
                ue.harq.load_retransmission(direction, grant.pid)?;
            }
        }

        let (tx_slot, ack_slot) = {
            let slot_ue = ue
                .make_slot_ue(pdcch_slot, bwp)
                .with_harq(ue.harq(), direction, grant.pid)?;
            let h = slot_ue.require_harq(direction)?;
            let prb_mask = bwp.prb_mask(h.grant());

            match direction {
                Direction::Downlink => {
                    let dci = fill_dl_dci_ue_fields(&slot_ue, bwp, grant.ss_id, grant.location)?;
                    Self::check_writable(grid, &[pdcch_slot, slot_ue.pdsch_slot, slot_ue.uci_slot])?;

                    let pdsch = SchAlloc {
                        rnti: slot_ue.rnti,
                        rnti_type: dci.ctx.rnti_type,
                        pid: h.pid(),
                        prb_mask,
                        mcs: h.mcs(),
                        tbs: h.tbs(),
                        rv: dci.rv,
                        ndi: dci.ndi,
                        lcids: grant.lcids.clone(),
                    };
                    let ack = HarqAckOccasion { rnti: slot_ue.rnti, pid: h.pid(), pdsch_slot: slot_ue.pdsch_slot };
                    grid.slot_mut(pdcch_slot)?.dl.pdcch_dl.push(PdcchDl { dci });
                    grid.slot_mut(slot_ue.pdsch_slot)?.dl.pdsch.push(pdsch);
                    grid.slot_mut(slot_ue.uci_slot)?.ul.harq_ack.push(ack);
                    (slot_ue.pdsch_slot, slot_ue.uci_slot)
                }
                Direction::Uplink => {
                    let dci = match grant.kind {
                        GrantKind::Data => fill_ul_dci_ue_fields(&slot_ue, bwp, grant.ss_id, grant.location)?,
                        GrantKind::Msg3 => {
                            let mut dci = fill_dci_msg3(&slot_ue, bwp)?;
                            dci.ctx.location = grant.location;
                            dci
                        }
                    };
                    Self::check_writable(grid, &[pdcch_slot, slot_ue.pusch_slot])?;

                    let pusch = SchAlloc {
                        rnti: slot_ue.rnti,
                        rnti_type: dci.ctx.rnti_type,
                        pid: h.pid(),
                        prb_mask,
                        mcs: h.mcs(),
                        tbs: h.tbs(),
                        rv: dci.rv,
                        ndi: dci.ndi,
                        lcids: grant.lcids.clone(),
                    };
                    grid.slot_mut(pdcch_slot)?.dl.pdcch_ul.push(PdcchUl { dci });
                    grid.slot_mut(slot_ue.pusch_slot)?.ul.pusch.push(pusch);
                    (slot_ue.pusch_slot, slot_ue.pusch_slot)
                }
            }
        };

        ue.harq.set_tx_slots(direction, grant.pid, tx_slot, ack_slot)?;
        if let Some(tb) = grant.new_data {
            ue.consume(direction, tb.tbs);
        } else if ue.harq().get(direction, grant.pid)?.max_retx_reached() {
            warn!("SCHED: rnti={} {} pid={} sent its last retransmission", grant.rnti, direction, grant.pid);
        }
        Ok(())
    }
}
