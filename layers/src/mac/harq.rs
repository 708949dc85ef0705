//! HARQ process tables
//!
//! Each UE owns one [`HarqEntity`] holding a fixed array of DL and UL
//! processes. Processes are loaded for a new transmission or a
//! retransmission when a grant is scheduled, and released on ACK or once the
//! retransmission budget is exhausted.

use super::prb_grant::PrbGrant;
use super::SchedError;
use common::slot::SlotPoint;
use common::types::{Direction, Rnti};
use std::fmt;
use tracing::{debug, trace, warn};

/// Default number of HARQ processes per direction
pub const DEFAULT_NOF_HARQS: usize = 16;
/// Default maximum number of retransmissions
pub const DEFAULT_MAX_RETX: u32 = 4;

/// Where a process stands in its transmission cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqPhase {
    Idle,
    /// Carrying the first transmission of a TB
    NewTx,
    /// Carrying a retransmission of a TB
    Retx,
}

/// One HARQ process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarqProcess {
    pid: u32,
    max_retx: u32,
    ndi: bool,
    nof_retx: u32,
    active: bool,
    /// NACK received, retransmission due
    pending_retx: bool,
    grant: PrbGrant,
    mcs: u32,
    tbs: u32,
    slot_tx: Option<SlotPoint>,
    slot_ack: Option<SlotPoint>,
}

impl HarqProcess {
    fn new(pid: u32, max_retx: u32) -> Self {
        Self {
            pid,
            max_retx,
            ndi: false,
            nof_retx: 0,
            active: false,
            pending_retx: false,
            grant: PrbGrant::default(),
            mcs: 0,
            tbs: 0,
            slot_tx: None,
            slot_ack: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn ndi(&self) -> bool {
        self.ndi
    }

    /// Retransmission counter, 0 for the first transmission
    pub fn nof_retx(&self) -> u32 {
        self.nof_retx
    }

    pub fn max_retx(&self) -> u32 {
        self.max_retx
    }

    pub fn is_empty(&self) -> bool {
        !self.active
    }

    pub fn has_pending_retx(&self) -> bool {
        self.active && self.pending_retx
    }

    pub fn grant(&self) -> &PrbGrant {
        &self.grant
    }

    pub fn mcs(&self) -> u32 {
        self.mcs
    }

    pub fn tbs(&self) -> u32 {
        self.tbs
    }

    pub fn slot_tx(&self) -> Option<SlotPoint> {
        self.slot_tx
    }

    pub fn slot_ack(&self) -> Option<SlotPoint> {
        self.slot_ack
    }

    pub fn phase(&self) -> HarqPhase {
        match (self.active, self.nof_retx) {
            (false, _) => HarqPhase::Idle,
            (true, 0) => HarqPhase::NewTx,
            (true, _) => HarqPhase::Retx,
        }
    }

    /// The retransmission budget is spent
    pub fn max_retx_reached(&self) -> bool {
        self.nof_retx >= self.max_retx
    }

    fn new_tx(&mut self, grant: PrbGrant, mcs: u32, tbs: u32) {
        self.ndi = !self.ndi;
        self.nof_retx = 0;
        self.active = true;
        self.pending_retx = false;
        self.grant = grant;
        self.mcs = mcs;
        self.tbs = tbs;
        self.slot_tx = None;
        self.slot_ack = None;
    }

    fn retx(&mut self) {
        self.nof_retx += 1;
        self.pending_retx = false;
    }

    fn reset(&mut self) {
        self.active = false;
        self.pending_retx = false;
        self.nof_retx = 0;
        self.slot_tx = None;
        self.slot_ack = None;
    }
}

impl fmt::Display for HarqProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={}, ndi={}, nof_retx={}, tbs={}",
               self.pid, self.ndi as u8, self.nof_retx, self.tbs)
    }
}

/// DL and UL HARQ process tables of one UE
#[derive(Debug, Clone)]
pub struct HarqEntity {
    rnti: Rnti,
    dl: Vec<HarqProcess>,
    ul: Vec<HarqProcess>,
}

impl HarqEntity {
    pub fn new(rnti: Rnti, nof_procs: usize, max_retx: u32) -> Self {
        let make = || (0..nof_procs as u32).map(|pid| HarqProcess::new(pid, max_retx)).collect();
        Self { rnti, dl: make(), ul: make() }
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    /// Number of processes per direction
    pub fn nof_procs(&self) -> usize {
        self.dl.len()
    }

    fn table(&self, direction: Direction) -> &[HarqProcess] {
        match direction {
            Direction::Downlink => &self.dl,
            Direction::Uplink => &self.ul,
        }
    }

    fn table_mut(&mut self, direction: Direction) -> &mut [HarqProcess] {
        match direction {
            Direction::Downlink => &mut self.dl,
            Direction::Uplink => &mut self.ul,
        }
    }

    /// Process `pid` of `direction`
    pub fn get(&self, direction: Direction, pid: u32) -> Result<&HarqProcess, SchedError> {
        let table = self.table(direction);
        table.get(pid as usize).ok_or(SchedError::InvalidHarqId {
            direction,
            pid,
            nof_procs: table.len(),
        })
    }

    fn get_mut(&mut self, direction: Direction, pid: u32) -> Result<&mut HarqProcess, SchedError> {
        let table = self.table_mut(direction);
        let nof_procs = table.len();
        table
            .get_mut(pid as usize)
            .ok_or(SchedError::InvalidHarqId { direction, pid, nof_procs })
    }

    /// Load a new TB: toggles NDI and resets the retransmission counter
    pub fn load_new_transmission(
        &mut self,
        direction: Direction,
        pid: u32,
        grant: PrbGrant,
        mcs: u32,
        tbs: u32,
    ) -> Result<&HarqProcess, SchedError> {
        let rnti = self.rnti;
        let h = self.get_mut(direction, pid)?;
        if h.has_pending_retx() {
            debug!("rnti={} {} HARQ pid={} dropped a pending retx for new data", rnti, direction, pid);
        }
        h.new_tx(grant, mcs, tbs);
        trace!("rnti={} {} HARQ new tx: {}", rnti, direction, h);
        Ok(&*h)
    }

    /// Load a retransmission of the TB held by the process
    pub fn load_retransmission(&mut self, direction: Direction, pid: u32) -> Result<&HarqProcess, SchedError> {
        let rnti = self.rnti;
        let h = self.get_mut(direction, pid)?;
        if !h.active {
            return Err(SchedError::HarqNotActive { rnti, direction, pid });
        }
        h.retx();
        trace!("rnti={} {} HARQ retx: {}", rnti, direction, h);
        Ok(&*h)
    }

    /// Record the slot of the transmission and of its ACK/CRC
    pub fn set_tx_slots(
        &mut self,
        direction: Direction,
        pid: u32,
        slot_tx: SlotPoint,
        slot_ack: SlotPoint,
    ) -> Result<(), SchedError> {
        let h = self.get_mut(direction, pid)?;
        h.slot_tx = Some(slot_tx);
        h.slot_ack = Some(slot_ack);
        Ok(())
    }

    /// Feed back an ACK (DL) or CRC (UL) result
    ///
    /// Returns the TBS of the acknowledged TB. A NACK leaves the process
    /// waiting for a retransmission.
    pub fn ack_info(&mut self, direction: Direction, pid: u32, ack: bool) -> Result<Option<u32>, SchedError> {
        let rnti = self.rnti;
        let h = self.get_mut(direction, pid)?;
        if !h.active {
            warn!("rnti={} {} HARQ pid={} received feedback while empty", rnti, direction, pid);
            return Ok(None);
        }
        if ack {
            let tbs = h.tbs;
            h.reset();
            Ok(Some(tbs))
        } else {
            h.pending_retx = true;
            Ok(None)
        }
    }

    /// Release the process if it spent its retransmissions, its last
    /// transmission was NACKed and that ACK occasion lies before `slot`
    pub fn clear_if_max_retx(&mut self, direction: Direction, pid: u32, slot: SlotPoint) -> Result<bool, SchedError> {
        let rnti = self.rnti;
        let h = self.get_mut(direction, pid)?;
        let ack_passed = h.slot_ack.map_or(false, |slot_ack| slot > slot_ack);
        if h.has_pending_retx() && h.max_retx_reached() && ack_passed {
            warn!("rnti={} {} HARQ pid={} dropped after {} retx, tbs={}",
                  rnti, direction, pid, h.nof_retx, h.tbs);
            h.reset();
            return Ok(true);
        }
        Ok(false)
    }

    /// Slot housekeeping: releases processes that reached max retx
    pub fn new_slot(&mut self, slot: SlotPoint) {
        for direction in [Direction::Downlink, Direction::Uplink] {
            for pid in 0..self.nof_procs() as u32 {
                // pid is in range by construction
                let _ = self.clear_if_max_retx(direction, pid, slot);
            }
        }
    }

    /// First idle process
    pub fn find_empty(&self, direction: Direction) -> Option<&HarqProcess> {
        self.table(direction).iter().find(|h| h.is_empty())
    }

    /// Oldest process waiting for a retransmission whose ACK slot lies
    /// before `slot`
    pub fn find_pending_retx(&self, direction: Direction, slot: SlotPoint) -> Option<&HarqProcess> {
        self.table(direction)
            .iter()
            .filter(|h| h.has_pending_retx() && !h.max_retx_reached())
            .filter(|h| h.slot_ack.map_or(true, |slot_ack| slot > slot_ack))
            .min_by_key(|h| h.slot_tx.map_or(i32::MIN, |tx| tx - slot))
    }

    pub(crate) fn restore(&mut self, direction: Direction, backup: HarqProcess) {
        let pid = backup.pid as usize;
        if let Some(h) = self.table_mut(direction).get_mut(pid) {
            *h = backup;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::dci_builder::rv_index;
    use crate::mac::prb_grant::PrbInterval;
    use common::types::SubcarrierSpacing;

    fn entity() -> HarqEntity {
        HarqEntity::new(Rnti(0x4601), DEFAULT_NOF_HARQS, DEFAULT_MAX_RETX)
    }

    fn grant() -> PrbGrant {
        PrbInterval::new(10, 30).into()
    }

    fn slot(count: u32) -> SlotPoint {
        SlotPoint::new(SubcarrierSpacing::Scs15, count)
    }

    #[test]
    fn test_new_transmission_toggles_ndi() {
        let mut harq = entity();
        let ndi0 = harq.get(Direction::Downlink, 3).unwrap().ndi();
        let h = harq.load_new_transmission(Direction::Downlink, 3, grant(), 20, 4096).unwrap();
        assert_eq!(h.ndi(), !ndi0);
        assert_eq!(h.nof_retx(), 0);
        assert_eq!(h.phase(), HarqPhase::NewTx);
        assert_eq!(h.tbs(), 4096);

        // UL table is independent
        assert!(harq.get(Direction::Uplink, 3).unwrap().is_empty());
    }

    #[test]
    fn test_retransmission_keeps_ndi() {
        let mut harq = entity();
        let ndi = harq.load_new_transmission(Direction::Uplink, 0, grant(), 10, 1000).unwrap().ndi();
        let h = harq.load_retransmission(Direction::Uplink, 0).unwrap();
        assert_eq!(h.ndi(), ndi);
        assert_eq!(h.nof_retx(), 1);
        assert_eq!(h.phase(), HarqPhase::Retx);
        assert_eq!(h.grant(), &grant());
        assert_eq!(h.mcs(), 10);
    }

    #[test]
    fn test_retransmission_of_idle_process_fails() {
        let mut harq = entity();
        assert!(matches!(
            harq.load_retransmission(Direction::Downlink, 1),
            Err(SchedError::HarqNotActive { pid: 1, .. })
        ));
    }

    #[test]
    fn test_out_of_range_pid() {
        let mut harq = entity();
        assert!(matches!(
            harq.get(Direction::Downlink, 16),
            Err(SchedError::InvalidHarqId { pid: 16, nof_procs: 16, .. })
        ));
        assert!(harq.load_new_transmission(Direction::Uplink, 99, grant(), 0, 0).is_err());
    }

    #[test]
    fn test_ack_releases_process() {
        let mut harq = entity();
        harq.load_new_transmission(Direction::Downlink, 2, grant(), 20, 4096).unwrap();
        assert_eq!(harq.ack_info(Direction::Downlink, 2, false).unwrap(), None);
        assert!(harq.get(Direction::Downlink, 2).unwrap().has_pending_retx());

        harq.load_retransmission(Direction::Downlink, 2).unwrap();
        assert!(!harq.get(Direction::Downlink, 2).unwrap().has_pending_retx());
        assert_eq!(harq.ack_info(Direction::Downlink, 2, true).unwrap(), Some(4096));
        assert_eq!(harq.get(Direction::Downlink, 2).unwrap().phase(), HarqPhase::Idle);
        assert_eq!(harq.ack_info(Direction::Downlink, 2, true).unwrap(), None);
    }

    #[test]
    fn test_max_retx_clears_after_ack_slot() {
        let mut harq = HarqEntity::new(Rnti(0x4601), 4, 1);
        harq.load_new_transmission(Direction::Downlink, 0, grant(), 20, 4096).unwrap();
        harq.load_retransmission(Direction::Downlink, 0).unwrap();
        harq.set_tx_slots(Direction::Downlink, 0, slot(10), slot(14)).unwrap();
        harq.ack_info(Direction::Downlink, 0, false).unwrap();

        // Budget spent, but not offered for retx
        assert!(harq.find_pending_retx(Direction::Downlink, slot(20)).is_none());
        assert!(!harq.clear_if_max_retx(Direction::Downlink, 0, slot(14)).unwrap());
        harq.new_slot(slot(15));
        assert!(harq.get(Direction::Downlink, 0).unwrap().is_empty());
    }

    #[test]
    fn test_late_ack_of_last_retx_is_credited() {
        let mut harq = HarqEntity::new(Rnti(0x4601), 4, 1);
        harq.load_new_transmission(Direction::Downlink, 0, grant(), 20, 4096).unwrap();
        harq.ack_info(Direction::Downlink, 0, false).unwrap();
        harq.load_retransmission(Direction::Downlink, 0).unwrap();
        harq.set_tx_slots(Direction::Downlink, 0, slot(10), slot(14)).unwrap();

        // No feedback yet for the last retx, the process waits for it
        harq.new_slot(slot(20));
        assert!(!harq.get(Direction::Downlink, 0).unwrap().is_empty());
        assert_eq!(harq.ack_info(Direction::Downlink, 0, true).unwrap(), Some(4096));
        assert!(harq.get(Direction::Downlink, 0).unwrap().is_empty());
    }

    #[test]
    fn test_find_helpers() {
        let mut harq = HarqEntity::new(Rnti(0x4601), 3, 4);
        assert_eq!(harq.find_empty(Direction::Uplink).unwrap().pid(), 0);
        for pid in 0..3 {
            harq.load_new_transmission(Direction::Uplink, pid, grant(), 5, 100).unwrap();
            harq.set_tx_slots(Direction::Uplink, pid, slot(pid * 2), slot(pid * 2 + 4)).unwrap();
        }
        assert!(harq.find_empty(Direction::Uplink).is_none());

        harq.ack_info(Direction::Uplink, 2, false).unwrap();
        harq.ack_info(Direction::Uplink, 1, false).unwrap();
        // ACK slot of pid 2 (8) not passed yet at slot 7
        assert_eq!(harq.find_pending_retx(Direction::Uplink, slot(7)).unwrap().pid(), 1);
        assert_eq!(harq.find_pending_retx(Direction::Uplink, slot(9)).unwrap().pid(), 1);
        assert!(harq.find_pending_retx(Direction::Uplink, slot(6)).is_none());
    }

    #[test]
    fn test_restore_rolls_back() {
        let mut harq = entity();
        let backup = harq.get(Direction::Downlink, 5).unwrap().clone();
        harq.load_new_transmission(Direction::Downlink, 5, grant(), 1, 1).unwrap();
        harq.restore(Direction::Downlink, backup.clone());
        assert_eq!(harq.get(Direction::Downlink, 5).unwrap(), &backup);
    }

    proptest::proptest! {
        #[test]
        fn prop_ndi_and_counter(ops in proptest::collection::vec(proptest::bool::ANY, 1..256)) {
            let mut harq = entity();
            harq.load_new_transmission(Direction::Downlink, 7, grant(), 10, 100).unwrap();
            for new_data in ops {
                let before = harq.get(Direction::Downlink, 7).unwrap().clone();
                let after = if new_data {
                    harq.load_new_transmission(Direction::Downlink, 7, grant(), 10, 100).unwrap()
                } else {
                    harq.load_retransmission(Direction::Downlink, 7).unwrap()
                };
                if new_data {
                    proptest::prop_assert_eq!(after.ndi(), !before.ndi());
                    proptest::prop_assert_eq!(after.nof_retx(), 0);
                } else {
                    proptest::prop_assert_eq!(after.ndi(), before.ndi());
                    proptest::prop_assert_eq!(after.nof_retx(), before.nof_retx() + 1);
                }
                let expected_rv = match after.nof_retx() % 4 {
                    0 => 0,
                    1 => 2,
                    2 => 3,
                    _ => 1,
                };
                proptest::prop_assert_eq!(rv_index(after.nof_retx()), expected_rv);
            }
        }
    }
}
