//! DCI builder
//!
//! Populates DL and UL DCIs from the HARQ state of a [`SlotUe`] and the BWP
//! configuration. Covers the C-RNTI data grants, RAR and Msg3 grants and the
//! SI-RNTI assignment for system information. None of these functions touch
//! scheduler state; callers place the PDCCH (`ctx.location`) when it is not
//! an input.

use super::bwp::BwpParams;
use super::prb_grant::{PrbGrant, PrbInterval};
use super::slot_ue::SlotUe;
use super::SchedError;
use common::dci::{DciContext, DciDl, DciFormat, DciLocation, DciUl, RntiType, SearchSpaceType};
use common::types::{Direction, Rnti};
use common::utils::riv_field_bits;
use tracing::trace;

/// Redundancy version sequence (TS 38.214 5.1.2.1)
pub const RV_IDX: [u32; 4] = [0, 2, 3, 1];
/// TPC command for 0 dB
pub const DEFAULT_TPC: u32 = 1;
/// MCS of RAR PDSCHs
pub const RAR_MCS: u32 = 5;
/// First row of the time domain resource allocation table
pub const DEFAULT_TIME_DOMAIN_ASSIGNMENT: u32 = 0;

/// Redundancy version of the `nof_retx`-th retransmission
pub fn rv_index(nof_retx: u32) -> u32 {
    RV_IDX[(nof_retx % 4) as usize]
}

/// Fields shared by DL and UL DCIs of a HARQ transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciCommonFields {
    pub bwp_id: u8,
    pub cc_id: u32,
    pub tpc: u32,
    pub pid: u32,
    pub ndi: bool,
    pub mcs: u32,
    pub rv: u32,
    pub freq_domain_assignment: u64,
    pub time_domain_assignment: u32,
}

impl DciCommonFields {
    pub fn apply_dl(&self, dci: &mut DciDl) {
        dci.bwp_id = self.bwp_id;
        dci.cc_id = self.cc_id;
        dci.tpc = self.tpc;
        dci.pid = self.pid;
        dci.ndi = self.ndi;
        dci.mcs = self.mcs;
        dci.rv = self.rv;
        dci.freq_domain_assignment = self.freq_domain_assignment;
        dci.time_domain_assignment = self.time_domain_assignment;
    }

    pub fn apply_ul(&self, dci: &mut DciUl) {
        dci.bwp_id = self.bwp_id;
        dci.cc_id = self.cc_id;
        dci.tpc = self.tpc;
        dci.pid = self.pid;
        dci.ndi = self.ndi;
        dci.mcs = self.mcs;
        dci.rv = self.rv;
        dci.freq_domain_assignment = self.freq_domain_assignment;
        dci.time_domain_assignment = self.time_domain_assignment;
    }
}

/// Frequency domain assignment of `grant` in a BWP of `nof_prb` RBs
fn freq_domain_assignment(grant: &PrbGrant, nof_prb: u32) -> Result<u64, SchedError> {
    grant
        .freq_domain_assignment(nof_prb)
        .ok_or_else(|| SchedError::InvalidGrant(format!("{} does not fit a BWP of {} RBs", grant, nof_prb)))
}

fn interval_riv(interval: &PrbInterval, nof_prb: u32) -> Result<u64, SchedError> {
    let riv = interval
        .riv(nof_prb)
        .ok_or_else(|| SchedError::InvalidGrant(format!("{} does not fit a BWP of {} RBs", interval, nof_prb)))?;
    trace!("RIV {} for {} ({} bit field)", riv, interval, riv_field_bits(nof_prb));
    Ok(u64::from(riv))
}

/// Fields common to DL and UL DCIs, from the HARQ process bound for
/// `direction`
pub fn fill_dci_common(ue: &SlotUe<'_>, direction: Direction, bwp: &BwpParams) -> Result<DciCommonFields, SchedError> {
    let h = ue.require_harq(direction)?;
    Ok(DciCommonFields {
        bwp_id: bwp.bwp_id(),
        cc_id: ue.cc,
        tpc: DEFAULT_TPC,
        pid: h.pid(),
        ndi: h.ndi(),
        mcs: h.mcs(),
        rv: rv_index(h.nof_retx()),
        freq_domain_assignment: freq_domain_assignment(h.grant(), bwp.rb_width())?,
        time_domain_assignment: DEFAULT_TIME_DOMAIN_ASSIGNMENT,
    })
}

/// DCI 1_0 scheduling a RAR on `interval`
pub fn fill_dci_rar(interval: PrbInterval, ra_rnti: Rnti, bwp: &BwpParams) -> Result<DciDl, SchedError> {
    let cs_id = bwp.ra_search_space()?.coreset_id;
    let coreset = bwp.coreset(cs_id)?;

    let mut dci = DciDl {
        ctx: DciContext {
            format: DciFormat::Format1_0,
            ss_type: SearchSpaceType::Common1,
            rnti_type: RntiType::Ra,
            rnti: ra_rnti,
            coreset_id: cs_id,
            coreset_start_rb: coreset.offset_rb,
            ..Default::default()
        },
        mcs: RAR_MCS,
        freq_domain_assignment: interval_riv(&interval, bwp.rb_width())?,
        time_domain_assignment: DEFAULT_TIME_DOMAIN_ASSIGNMENT,
        tpc: DEFAULT_TPC,
        bwp_id: bwp.bwp_id(),
        cc_id: bwp.cc,
        ..Default::default()
    };
    if bwp.cfg.pdcch.coreset0_present() && cs_id == 0 {
        dci.coreset0_bw = Some(coreset.bandwidth());
    }
    trace!("RAR DCI ra-rnti={} prbs={} cs={}", ra_rnti, interval, cs_id);
    Ok(dci)
}

/// Msg3 grant: format RAR for the first transmission, DCI 0_0 with TC-RNTI
/// for retransmissions
pub fn fill_dci_msg3(ue: &SlotUe<'_>, bwp: &BwpParams) -> Result<DciUl, SchedError> {
    let common = fill_dci_common(ue, Direction::Uplink, bwp)?;
    let cs_id = ue.phy.ra_search_space().ok_or(SchedError::MissingRaSearchSpace)?.coreset_id;
    let coreset = bwp.coreset(cs_id)?;
    let h = ue.require_harq(Direction::Uplink)?;

    let mut dci = DciUl {
        ctx: DciContext {
            coreset_id: cs_id,
            coreset_start_rb: coreset.offset_rb,
            rnti_type: RntiType::Tc,
            rnti: ue.rnti,
            ss_type: SearchSpaceType::Rar,
            format: if h.nof_retx() == 0 { DciFormat::Rar } else { DciFormat::Format0_0 },
            ..Default::default()
        },
        ..Default::default()
    };
    common.apply_ul(&mut dci);
    Ok(dci)
}

/// C-RNTI DL assignment on candidate `location` of search space `ss_id`
pub fn fill_dl_dci_ue_fields(
    ue: &SlotUe<'_>,
    bwp: &BwpParams,
    ss_id: u32,
    location: DciLocation,
) -> Result<DciDl, SchedError> {
    let ctx = ue
        .phy
        .candidate_context(Direction::Downlink, ss_id, location, ue.rnti)
        .map_err(|source| SchedError::InvalidCandidate { rnti: ue.rnti, source })?;

    let mut dci = DciDl { ctx, ..Default::default() };
    fill_dci_common(ue, Direction::Downlink, bwp)?.apply_dl(&mut dci);
    dci.harq_feedback = if dci.ctx.format == DciFormat::Format1_0 {
        // PDSCH-to-HARQ timing indicator, k1 - 1
        (ue.uci_slot - ue.pdsch_slot - 1).max(0) as u32
    } else {
        ue.pdsch_slot.slot_idx()
    };
    Ok(dci)
}

/// C-RNTI UL grant on candidate `location` of search space `ss_id`
pub fn fill_ul_dci_ue_fields(
    ue: &SlotUe<'_>,
    bwp: &BwpParams,
    ss_id: u32,
    location: DciLocation,
) -> Result<DciUl, SchedError> {
    let ctx = ue
        .phy
        .candidate_context(Direction::Uplink, ss_id, location, ue.rnti)
        .map_err(|source| SchedError::InvalidCandidate { rnti: ue.rnti, source })?;

    let mut dci = DciUl { ctx, ..Default::default() };
    fill_dci_common(ue, Direction::Uplink, bwp)?.apply_ul(&mut dci);
    Ok(dci)
}

/// DCI 1_0 with SI-RNTI in the type-0 common search space; `sii` is 0 for
/// SIB1
pub fn fill_dci_si(interval: PrbInterval, sii: u32, mcs: u32, bwp: &BwpParams) -> Result<DciDl, SchedError> {
    let cs_id = bwp.search_space(0)?.coreset_id;
    let coreset = bwp.coreset(cs_id)?;

    let mut dci = DciDl {
        ctx: DciContext {
            format: DciFormat::Format1_0,
            ss_type: SearchSpaceType::Common0,
            rnti_type: RntiType::Si,
            rnti: Rnti::SI,
            coreset_id: cs_id,
            coreset_start_rb: coreset.offset_rb,
            ..Default::default()
        },
        mcs,
        sii,
        freq_domain_assignment: interval_riv(&interval, bwp.rb_width())?,
        time_domain_assignment: DEFAULT_TIME_DOMAIN_ASSIGNMENT,
        bwp_id: bwp.bwp_id(),
        cc_id: bwp.cc,
        ..Default::default()
    };
    if cs_id == 0 {
        dci.coreset0_bw = Some(coreset.bandwidth());
    }
    Ok(dci)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::bwp::BwpConfig;
    use crate::mac::prb_grant::RbgBitmap;
    use crate::mac::slot_ue::SchedUe;
    use common::slot::SlotPoint;
    use common::types::SubcarrierSpacing;
    use interfaces::phy_config::UePhyConfig;
    use std::sync::Arc;

    const RNTI: Rnti = Rnti(0x4601);

    fn bwp(cfg: BwpConfig) -> BwpParams {
        BwpParams::new(0, SubcarrierSpacing::Scs15, cfg).unwrap()
    }

    fn sched_ue(phy: UePhyConfig) -> SchedUe {
        SchedUe::new(RNTI, 0, Arc::new(phy), 16, 4)
    }

    fn slot(count: u32) -> SlotPoint {
        SlotPoint::new(SubcarrierSpacing::Scs15, count)
    }

    fn location() -> DciLocation {
        DciLocation { aggregation_level: 2, ncce: 4 }
    }

    #[test]
    fn test_rv_sequence() {
        let expected = [0, 2, 3, 1, 0, 2, 3, 1, 0];
        for (n, rv) in expected.iter().enumerate() {
            assert_eq!(rv_index(n as u32), *rv);
        }
    }

    #[test]
    fn test_dl_new_tx_contiguous_grant() {
        let bwp = bwp(BwpConfig::new(52));
        let mut ue = sched_ue(UePhyConfig::default());
        ue.harq
            .load_new_transmission(Direction::Downlink, 3, PrbInterval::with_length(10, 20).into(), 20, 4096)
            .unwrap();

        let slot_ue = ue.make_slot_ue(slot(3), &bwp).with_harq(ue.harq(), Direction::Downlink, 3).unwrap();
        let dci = fill_dl_dci_ue_fields(&slot_ue, &bwp, 2, location()).unwrap();
        assert_eq!(dci.freq_domain_assignment, 998);
        assert_eq!(dci.pid, 3);
        assert!(dci.ndi);
        assert_eq!(dci.rv, 0);
        assert_eq!(dci.mcs, 20);
        assert_eq!(dci.tpc, 1);
        assert_eq!(dci.time_domain_assignment, 0);
        assert_eq!(dci.ctx.rnti, RNTI);
        assert_eq!(dci.ctx.rnti_type, RntiType::C);
        assert_eq!(dci.ctx.location, location());
        // Fallback timing: k1 - 1
        assert_eq!(dci.ctx.format, DciFormat::Format1_0);
        assert_eq!(dci.harq_feedback, 3);
    }

    #[test]
    fn test_dl_non_fallback_harq_feedback() {
        let mut bwp_cfg = BwpConfig::new(52);
        bwp_cfg.harq_ack_k1 = 5;
        let bwp = bwp(bwp_cfg);
        let mut phy = UePhyConfig::default();
        phy.pdcch.search_spaces[2].formats = vec![DciFormat::Format0_1, DciFormat::Format1_1];
        let mut ue = sched_ue(phy);
        ue.harq
            .load_new_transmission(Direction::Downlink, 0, PrbInterval::new(0, 4).into(), 10, 512)
            .unwrap();

        let slot_ue = ue.make_slot_ue(slot(13), &bwp).with_harq(ue.harq(), Direction::Downlink, 0).unwrap();
        let dci = fill_dl_dci_ue_fields(&slot_ue, &bwp, 2, location()).unwrap();
        assert_eq!(dci.ctx.format, DciFormat::Format1_1);
        assert_eq!(dci.harq_feedback, 3);
    }

    #[test]
    fn test_dl_retx_keeps_ndi() {
        let bwp = bwp(BwpConfig::new(52));
        let mut ue = sched_ue(UePhyConfig::default());
        let ndi = ue
            .harq
            .load_new_transmission(Direction::Downlink, 1, PrbInterval::new(0, 8).into(), 20, 4096)
            .unwrap()
            .ndi();
        ue.harq.load_retransmission(Direction::Downlink, 1).unwrap();

        let slot_ue = ue.make_slot_ue(slot(8), &bwp).with_harq(ue.harq(), Direction::Downlink, 1).unwrap();
        let dci = fill_dl_dci_ue_fields(&slot_ue, &bwp, 2, location()).unwrap();
        assert_eq!(dci.ndi, ndi);
        assert_eq!(dci.rv, 2);
        assert_eq!(ue.harq().get(Direction::Downlink, 1).unwrap().nof_retx(), 1);
    }

    #[test]
    fn test_ul_grouped_grant() {
        let bwp = bwp(BwpConfig::new(52));
        let mut ue = sched_ue(UePhyConfig::default());
        let rbgs = RbgBitmap::from_bits(13, 0b1_0000_0000_0011).unwrap();
        ue.harq.load_new_transmission(Direction::Uplink, 2, rbgs.into(), 12, 2048).unwrap();

        let slot_ue = ue.make_slot_ue(slot(0), &bwp).with_harq(ue.harq(), Direction::Uplink, 2).unwrap();
        let dci = fill_ul_dci_ue_fields(&slot_ue, &bwp, 2, location()).unwrap();
        assert_eq!(dci.freq_domain_assignment, 0b1_0000_0000_0011);
        assert_eq!(dci.ctx.format, DciFormat::Format0_0);
        assert_eq!(dci.pid, 2);
    }

    #[test]
    fn test_invalid_candidate_is_rejected() {
        let bwp = bwp(BwpConfig::new(52));
        let mut ue = sched_ue(UePhyConfig::default());
        ue.harq.load_new_transmission(Direction::Uplink, 0, PrbInterval::new(0, 4).into(), 1, 1).unwrap();
        let slot_ue = ue.make_slot_ue(slot(0), &bwp).with_harq(ue.harq(), Direction::Uplink, 0).unwrap();
        let bad = DciLocation { aggregation_level: 0, ncce: 0 };
        assert!(matches!(
            fill_ul_dci_ue_fields(&slot_ue, &bwp, 2, bad),
            Err(SchedError::InvalidCandidate { .. })
        ));
    }

    #[test]
    fn test_grant_outside_bwp_is_rejected() {
        let bwp = bwp(BwpConfig::new(24));
        let mut ue = sched_ue(UePhyConfig::default());
        ue.harq.load_new_transmission(Direction::Downlink, 0, PrbInterval::new(20, 30).into(), 1, 1).unwrap();
        let slot_ue = ue.make_slot_ue(slot(0), &bwp).with_harq(ue.harq(), Direction::Downlink, 0).unwrap();
        assert!(matches!(
            fill_dci_common(&slot_ue, Direction::Downlink, &bwp),
            Err(SchedError::InvalidGrant(_))
        ));
    }

    #[test]
    fn test_msg3_format_follows_retx() {
        let bwp = bwp(BwpConfig::new(52));
        let mut ue = sched_ue(UePhyConfig::default());
        ue.harq.load_new_transmission(Direction::Uplink, 0, PrbInterval::new(14, 17).into(), 0, 456).unwrap();

        let slot_ue = ue.make_slot_ue(slot(0), &bwp).with_harq(ue.harq(), Direction::Uplink, 0).unwrap();
        let dci = fill_dci_msg3(&slot_ue, &bwp).unwrap();
        assert_eq!(dci.ctx.format, DciFormat::Rar);
        assert_eq!(dci.ctx.rnti_type, RntiType::Tc);
        assert_eq!(dci.ctx.ss_type, SearchSpaceType::Rar);
        assert_eq!(dci.ctx.coreset_id, 0);
        assert_eq!(dci.rv, 0);

        ue.harq.load_retransmission(Direction::Uplink, 0).unwrap();
        let slot_ue = ue.make_slot_ue(slot(8), &bwp).with_harq(ue.harq(), Direction::Uplink, 0).unwrap();
        let dci = fill_dci_msg3(&slot_ue, &bwp).unwrap();
        assert_eq!(dci.ctx.format, DciFormat::Format0_0);
        assert_eq!(dci.rv, 2);
    }

    #[test]
    fn test_msg3_without_ra_search_space() {
        let bwp = bwp(BwpConfig::new(52));
        let mut phy = UePhyConfig::default();
        phy.pdcch.ra_search_space_id = 9;
        let mut ue = sched_ue(phy);
        ue.harq.load_new_transmission(Direction::Uplink, 0, PrbInterval::new(0, 3).into(), 0, 456).unwrap();
        let slot_ue = ue.make_slot_ue(slot(0), &bwp).with_harq(ue.harq(), Direction::Uplink, 0).unwrap();
        assert!(matches!(fill_dci_msg3(&slot_ue, &bwp), Err(SchedError::MissingRaSearchSpace)));
    }

    #[test]
    fn test_rar_coreset0_bandwidth() {
        let bwp0 = bwp(BwpConfig::new(52));
        let dci = fill_dci_rar(PrbInterval::with_length(0, 10), Rnti(0x10b), &bwp0).unwrap();
        assert_eq!(dci.coreset0_bw, Some(24));
        assert_eq!(dci.freq_domain_assignment, 468);
        assert_eq!(dci.mcs, RAR_MCS);
        assert_eq!(dci.ctx.format, DciFormat::Format1_0);
        assert_eq!(dci.ctx.ss_type, SearchSpaceType::Common1);
        assert_eq!(dci.ctx.rnti_type, RntiType::Ra);
        assert_eq!(dci.tpc, 1);

        // RA search space on CORESET#1
        let mut cfg = BwpConfig::new(52);
        cfg.pdcch.search_spaces[1].coreset_id = 1;
        let bwp1 = bwp(cfg);
        let dci = fill_dci_rar(PrbInterval::with_length(0, 10), Rnti(0x10b), &bwp1).unwrap();
        assert_eq!(dci.coreset0_bw, None);
        assert_eq!(dci.ctx.coreset_id, 1);
    }

    #[test]
    fn test_rar_interval_outside_bwp() {
        let params = bwp(BwpConfig::new(52));
        assert!(fill_dci_rar(PrbInterval::new(0, 4), Rnti(1), &params).is_ok());
        assert!(matches!(
            fill_dci_rar(PrbInterval::new(50, 60), Rnti(1), &params),
            Err(SchedError::InvalidGrant(_))
        ));
    }

    #[test]
    fn test_rar_missing_coreset() {
        let mut cfg = BwpConfig::new(52);
        cfg.pdcch.search_spaces[1].coreset_id = 1;
        let mut params = bwp(cfg);
        params.cfg.pdcch.coresets.retain(|cs| cs.id != 1);
        assert!(matches!(
            fill_dci_rar(PrbInterval::new(0, 4), Rnti(1), &params),
            Err(SchedError::MissingCoreset(1))
        ));
    }

    #[test]
    fn test_si_dci() {
        let bwp = bwp(BwpConfig::new(52));
        let dci = fill_dci_si(PrbInterval::new(0, 10), 0, 2, &bwp).unwrap();
        assert_eq!(dci.ctx.rnti, Rnti::SI);
        assert_eq!(dci.ctx.rnti_type, RntiType::Si);
        assert_eq!(dci.ctx.ss_type, SearchSpaceType::Common0);
        assert_eq!(dci.sii, 0);
        assert_eq!(dci.coreset0_bw, Some(24));
        assert_eq!(dci.freq_domain_assignment, 468);
    }
}
