//! Synthetic allocation policy
//!
//! Attaches UEs one RACH procedure at a time, generates DL/UL buffer
//! arrivals and serves connected UEs round robin, one DL and one UL grant
//! per slot. PRBs are split statically: SIB1 at the bottom of the BWP, then
//! the RAR, then Msg3, then user data.

use crate::phy_stub::Feedback;
use common::dci::{DciLocation, RntiType};
use common::slot::SlotPoint;
use common::types::{Direction, Rnti};
use common::utils::div_ceil;
use interfaces::phy_config::DciContextProvider;
use layers::mac::{
    GrantKind, MacScheduler, Msg3Decision, PrbInterval, RarDecision, SchedError, SlotDecisions, TbParams, UeGrant,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// PRBs of the RAR PDSCH
const RAR_PRBS: (u32, u32) = (10, 14);
/// PRBs of Msg3 PUSCHs
const MSG3_PRBS: (u32, u32) = (14, 17);
/// First PRB available to user data
const DATA_FIRST_PRB: u32 = 17;

const RAR_TBS: u32 = 56;
const MSG3_MCS: u32 = 0;
const MSG3_TBS: u32 = 456;
/// Search space of the UE data grants
const UE_SEARCH_SPACE: u32 = 2;
/// Slots without Msg3 activity before the RACH attempt is abandoned
const RACH_TIMEOUT_SLOTS: i32 = 20;
/// Data LCID carried in synthetic DL transport blocks
const DRB_LCID: u32 = 4;

/// Traffic generation parameters
#[derive(Debug, Clone)]
pub struct TrafficConfig {
    pub nof_ues: u16,
    /// Mean DL bytes arriving per UE and slot
    pub dl_bytes_per_slot: u32,
    /// Mean UL bytes arriving per UE and slot
    pub ul_bytes_per_slot: u32,
    pub dl_mcs: u32,
    pub ul_mcs: u32,
    pub seed: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            nof_ues: 4,
            dl_bytes_per_slot: 500,
            ul_bytes_per_slot: 100,
            dl_mcs: 20,
            ul_mcs: 10,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UeState {
    /// Waiting to start a RACH procedure
    Idle,
    /// RAR sent, Msg3 not received yet; `last_tx` is the last Msg3 grant
    Msg3Pending { last_tx: SlotPoint },
    Connected,
}

#[derive(Debug)]
struct TrafficUe {
    rnti: Rnti,
    preamble_idx: u32,
    state: UeState,
}

/// Counters accumulated from scheduler reports and feedback
#[derive(Debug, Default, Clone, Copy)]
pub struct TrafficStats {
    pub rach_attempts: u64,
    pub connected: u64,
    pub dl_acked_bits: u64,
    pub ul_received_bits: u64,
    pub dl_nacks: u64,
    pub ul_crc_failures: u64,
}

/// Coarse TBS in bits of one PRB, 12 symbols of 12 subcarriers
fn tbs_per_prb(mcs: u32) -> u32 {
    let bits_per_re = match mcs {
        0..=9 => 1,
        10..=16 => 2,
        17..=23 => 4,
        _ => 5,
    };
    144 * bits_per_re
}

/// RA-RNTI of a PRACH occasion in the first symbol of `slot` (TS 38.321 5.1.3)
pub fn ra_rnti(slot: SlotPoint) -> Rnti {
    Rnti(1 + 14 * (slot.slot_idx() % 80) as u16)
}

pub struct TrafficPolicy {
    cfg: TrafficConfig,
    phy: Arc<dyn DciContextProvider + Send + Sync>,
    ues: Vec<TrafficUe>,
    rng: StdRng,
    next_dl: usize,
    next_ul: usize,
    stats: TrafficStats,
}

impl TrafficPolicy {
    pub fn new(cfg: TrafficConfig, phy: Arc<dyn DciContextProvider + Send + Sync>) -> Self {
        let ues = (0..cfg.nof_ues)
            .map(|i| TrafficUe {
                rnti: Rnti(Rnti::FIRST_C_RNTI.0 + i),
                preamble_idx: u32::from(i % 64),
                state: UeState::Idle,
            })
            .collect();
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self { cfg, phy, ues, rng, next_dl: 0, next_ul: 0, stats: TrafficStats::default() }
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    pub fn nof_connected(&self) -> usize {
        self.ues.iter().filter(|ue| ue.state == UeState::Connected).count()
    }

    /// Apply PHY feedback to the scheduler
    pub fn apply_feedback(&mut self, sched: &mut MacScheduler, feedback: Feedback) {
        match feedback {
            Feedback::DlAck { rnti, pid, ack } => match sched.dl_ack_info(rnti, pid, ack) {
                Ok(Some(tbs)) => self.stats.dl_acked_bits += u64::from(tbs),
                Ok(None) => self.stats.dl_nacks += u64::from(!ack),
                Err(e) => warn!("Dropped DL HARQ-ACK of rnti={}: {}", rnti, e),
            },
            Feedback::UlCrc { rnti, rnti_type, pid, crc } => {
                match sched.ul_crc_info(rnti, pid, crc) {
                    Ok(Some(tbs)) => self.stats.ul_received_bits += u64::from(tbs),
                    Ok(None) => self.stats.ul_crc_failures += u64::from(!crc),
                    Err(e) => {
                        warn!("Dropped UL CRC of rnti={}: {}", rnti, e);
                        return;
                    }
                }
                if rnti_type == RntiType::Tc && crc {
                    self.on_msg3(rnti);
                }
            }
        }
    }

    fn on_msg3(&mut self, rnti: Rnti) {
        if let Some(ue) = self.ues.iter_mut().find(|ue| ue.rnti == rnti) {
            if matches!(ue.state, UeState::Msg3Pending { .. }) {
                ue.state = UeState::Connected;
                self.stats.connected += 1;
                info!("UE rnti={} connected", rnti);
            }
        }
    }

    /// Decide the grants of `pdcch_slot`
    pub fn new_slot(&mut self, pdcch_slot: SlotPoint, sched: &mut MacScheduler) -> SlotDecisions {
        let mut decisions = SlotDecisions::default();
        self.generate_arrivals(sched);

        // CORESET#0 holds SIB1 or one RA DCI per slot
        if !sched.is_sib1_slot(pdcch_slot) {
            self.schedule_ra(pdcch_slot, sched, &mut decisions);
        }

        let nof_prb = sched.bwp().rb_width();
        if nof_prb > DATA_FIRST_PRB {
            let data_prbs = PrbInterval::new(DATA_FIRST_PRB, nof_prb);
            if let Some(grant) = self.pick_grant(pdcch_slot, sched, Direction::Downlink, data_prbs) {
                decisions.ue_grants.push(grant);
            }
            if let Some(grant) = self.pick_grant(pdcch_slot, sched, Direction::Uplink, data_prbs) {
                decisions.ue_grants.push(grant);
            }
        }
        decisions
    }

    /// Uniform arrival in [1, 2 * mean]
    fn arrival(rng: &mut StdRng, mean: u32) -> u32 {
        if mean == 0 {
            0
        } else {
            rng.gen_range(1..=mean.saturating_mul(2))
        }
    }

    fn generate_arrivals(&mut self, sched: &mut MacScheduler) {
        for ue in self.ues.iter().filter(|ue| ue.state == UeState::Connected) {
            let Some(sched_ue) = sched.ue(ue.rnti) else { continue };
            let (dl_bytes, ul_bytes) = (sched_ue.dl_bytes(), sched_ue.ul_bytes());
            let dl_arrival = Self::arrival(&mut self.rng, self.cfg.dl_bytes_per_slot);
            let ul_arrival = Self::arrival(&mut self.rng, self.cfg.ul_bytes_per_slot);
            // UE is known to the scheduler
            let _ = sched.dl_buffer_state(ue.rnti, dl_bytes.saturating_add(dl_arrival));
            let _ = sched.ul_bsr(ue.rnti, ul_bytes.saturating_add(ul_arrival));
        }
    }

    fn schedule_ra(&mut self, pdcch_slot: SlotPoint, sched: &mut MacScheduler, decisions: &mut SlotDecisions) {
        let ra_location = DciLocation { aggregation_level: 2, ncce: 4 };

        if let Some(ue) = self.ues.iter_mut().find(|ue| matches!(ue.state, UeState::Msg3Pending { .. })) {
            let UeState::Msg3Pending { last_tx } = ue.state else { return };
            let (active, retx_due) = match sched.ue(ue.rnti).and_then(|u| u.harq().get(Direction::Uplink, 0).ok()) {
                Some(h) => (
                    !h.is_empty(),
                    h.has_pending_retx()
                        && !h.max_retx_reached()
                        && h.slot_ack().map_or(true, |ack| pdcch_slot > ack),
                ),
                None => (false, false),
            };

            if retx_due {
                decisions.ue_grants.push(UeGrant {
                    rnti: ue.rnti,
                    direction: Direction::Uplink,
                    kind: GrantKind::Msg3,
                    pid: 0,
                    grant: PrbInterval::new(MSG3_PRBS.0, MSG3_PRBS.1).into(),
                    new_data: None,
                    ss_id: sched.bwp().cfg.pdcch.ra_search_space_id,
                    location: ra_location,
                    lcids: Vec::new(),
                });
                ue.state = UeState::Msg3Pending { last_tx: pdcch_slot };
            } else if !active && pdcch_slot - last_tx > RACH_TIMEOUT_SLOTS {
                warn!("RACH of tc-rnti={} failed, retrying", ue.rnti);
                sched.rem_ue(ue.rnti);
                ue.state = UeState::Idle;
            }
            return;
        }

        let Some(ue) = self.ues.iter_mut().find(|ue| ue.state == UeState::Idle) else { return };
        if let Err(e) = sched.add_ue(ue.rnti, Arc::clone(&self.phy)) {
            match e {
                SchedError::DuplicateUe(_) => debug!("tc-rnti={} still registered", ue.rnti),
                e => {
                    warn!("Failed to add tc-rnti={}: {}", ue.rnti, e);
                    return;
                }
            }
        }
        decisions.rars.push(RarDecision {
            ra_rnti: ra_rnti(pdcch_slot),
            interval: PrbInterval::new(RAR_PRBS.0, RAR_PRBS.1),
            location: ra_location,
            tbs: RAR_TBS,
            msg3: vec![Msg3Decision {
                tc_rnti: ue.rnti,
                preamble_idx: ue.preamble_idx,
                ta_cmd: 0,
                pid: 0,
                interval: PrbInterval::new(MSG3_PRBS.0, MSG3_PRBS.1),
                mcs: MSG3_MCS,
                tbs: MSG3_TBS,
            }],
        });
        ue.state = UeState::Msg3Pending { last_tx: pdcch_slot };
        self.stats.rach_attempts += 1;
    }

    /// Next connected UE, round robin, with a retransmission or pending data
    fn pick_grant(
        &mut self,
        pdcch_slot: SlotPoint,
        sched: &MacScheduler,
        direction: Direction,
        data_prbs: PrbInterval,
    ) -> Option<UeGrant> {
        let nof_ues = self.ues.len();
        if nof_ues == 0 {
            return None;
        }
        let start = match direction {
            Direction::Downlink => self.next_dl,
            Direction::Uplink => self.next_ul,
        };
        let (location, mcs) = match direction {
            Direction::Downlink => (DciLocation { aggregation_level: 2, ncce: 0 }, self.cfg.dl_mcs),
            Direction::Uplink => (DciLocation { aggregation_level: 2, ncce: 4 }, self.cfg.ul_mcs),
        };

        for offset in 0..nof_ues {
            let idx = (start + offset) % nof_ues;
            let ue = &self.ues[idx];
            if ue.state != UeState::Connected {
                continue;
            }
            let Some(sched_ue) = sched.ue(ue.rnti) else { continue };
            let harq = sched_ue.harq();

            let grant = if let Some(h) = harq.find_pending_retx(direction, pdcch_slot) {
                Some((h.pid(), None, data_prbs))
            } else {
                let pending = match direction {
                    Direction::Downlink => sched_ue.dl_bytes(),
                    Direction::Uplink => sched_ue.ul_bytes(),
                };
                match harq.find_empty(direction) {
                    Some(h) if pending > 0 => {
                        let per_prb = tbs_per_prb(mcs);
                        let nof_prb = div_ceil(pending.saturating_mul(8), per_prb).clamp(1, data_prbs.length());
                        let tb = TbParams { mcs, tbs: nof_prb * per_prb };
                        Some((h.pid(), Some(tb), PrbInterval::with_length(data_prbs.start(), nof_prb)))
                    }
                    _ => None,
                }
            };

            if let Some((pid, new_data, prbs)) = grant {
                match direction {
                    Direction::Downlink => self.next_dl = idx + 1,
                    Direction::Uplink => self.next_ul = idx + 1,
                }
                return Some(UeGrant {
                    rnti: ue.rnti,
                    direction,
                    kind: GrantKind::Data,
                    pid,
                    grant: prbs.into(),
                    new_data,
                    ss_id: UE_SEARCH_SPACE,
                    location,
                    lcids: match direction {
                        Direction::Downlink => vec![DRB_LCID],
                        Direction::Uplink => Vec::new(),
                    },
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::SubcarrierSpacing;
    use interfaces::phy_config::UePhyConfig;
    use layers::mac::{BwpConfig, BwpParams, SchedConfig};

    fn slot(count: u32) -> SlotPoint {
        SlotPoint::new(SubcarrierSpacing::Scs15, count)
    }

    fn setup(nof_ues: u16) -> (MacScheduler, TrafficPolicy) {
        let bwp = BwpParams::new(0, SubcarrierSpacing::Scs15, BwpConfig::new(52)).unwrap();
        let sched = MacScheduler::new(bwp, SchedConfig::default()).unwrap();
        let cfg = TrafficConfig { nof_ues, ..Default::default() };
        let policy = TrafficPolicy::new(cfg, Arc::new(UePhyConfig::default()));
        (sched, policy)
    }

    #[test]
    fn test_ra_rnti() {
        assert_eq!(ra_rnti(slot(0)), Rnti(1));
        assert_eq!(ra_rnti(slot(13)), Rnti(43));
        assert!(ra_rnti(SlotPoint::new(SubcarrierSpacing::Scs120, 79)).is_ra_rnti());
    }

    #[test]
    fn test_tbs_per_prb() {
        assert_eq!(tbs_per_prb(0), 144);
        assert_eq!(tbs_per_prb(20), 576);
        assert_eq!(tbs_per_prb(27), 720);
    }

    #[test]
    fn test_rach_then_data() {
        let (mut sched, mut policy) = setup(1);
        let rnti = Rnti::FIRST_C_RNTI;

        // SIB1 slot carries no RAR
        let decisions = policy.new_slot(slot(2), &mut sched);
        assert!(decisions.rars.is_empty());

        let decisions = policy.new_slot(slot(3), &mut sched);
        assert_eq!(decisions.rars.len(), 1);
        assert_eq!(decisions.rars[0].msg3[0].tc_rnti, rnti);
        let report = sched.run_slot(slot(3), &decisions);
        assert_eq!(report.nof_msg3, 1);

        // Msg3 lost: retransmitted on the TC-RNTI
        policy.apply_feedback(&mut sched, Feedback::UlCrc { rnti, rnti_type: RntiType::Tc, pid: 0, crc: false });
        let decisions = policy.new_slot(slot(10), &mut sched);
        assert_eq!(decisions.ue_grants.len(), 1);
        assert_eq!(decisions.ue_grants[0].kind, GrantKind::Msg3);
        assert_eq!(sched.run_slot(slot(10), &decisions).nof_ul, 1);

        policy.apply_feedback(&mut sched, Feedback::UlCrc { rnti, rnti_type: RntiType::Tc, pid: 0, crc: true });
        assert_eq!(policy.nof_connected(), 1);
        assert_eq!(policy.stats().ul_received_bits, u64::from(MSG3_TBS));

        let decisions = policy.new_slot(slot(20), &mut sched);
        assert!(decisions.rars.is_empty());
        assert_eq!(decisions.ue_grants.len(), 2);
        let dl = &decisions.ue_grants[0];
        assert_eq!(dl.direction, Direction::Downlink);
        assert!(dl.new_data.is_some());
        assert_eq!(dl.lcids, vec![DRB_LCID]);
        let report = sched.run_slot(slot(20), &decisions);
        assert_eq!(report.nof_failed, 0);
        assert_eq!(report.nof_dl + report.nof_ul, 2);
    }

    #[test]
    fn test_one_rach_at_a_time() {
        let (mut sched, mut policy) = setup(2);
        let first = policy.new_slot(slot(3), &mut sched);
        sched.run_slot(slot(3), &first);
        let second = policy.new_slot(slot(4), &mut sched);
        assert!(second.rars.is_empty());
        assert_eq!(sched.nof_ues(), 1);
    }

    #[test]
    fn test_rach_timeout() {
        let (mut sched, mut policy) = setup(1);
        let decisions = policy.new_slot(slot(3), &mut sched);
        sched.run_slot(slot(3), &decisions);
        // Msg3 acknowledged by the scheduler but the connection event is lost
        sched.ul_crc_info(Rnti::FIRST_C_RNTI, 0, true).unwrap();

        policy.new_slot(slot(10), &mut sched);
        assert_eq!(sched.nof_ues(), 1);
        policy.new_slot(slot(24), &mut sched);
        assert_eq!(sched.nof_ues(), 0);

        let retry = policy.new_slot(slot(25), &mut sched);
        assert_eq!(retry.rars.len(), 1);
        assert_eq!(policy.stats().rach_attempts, 2);
    }
}
