//! Scheduler UE state and its per-slot view

use super::bwp::BwpParams;
use super::harq::{HarqEntity, HarqProcess};
use super::SchedError;
use common::slot::SlotPoint;
use common::types::{Direction, Rnti};
use interfaces::phy_config::DciContextProvider;
use std::sync::Arc;

/// UE context kept by the scheduler across slots
pub struct SchedUe {
    rnti: Rnti,
    cc: u32,
    phy: Arc<dyn DciContextProvider + Send + Sync>,
    pub(crate) harq: HarqEntity,
    dl_bytes: u32,
    ul_bytes: u32,
}

impl SchedUe {
    pub fn new(
        rnti: Rnti,
        cc: u32,
        phy: Arc<dyn DciContextProvider + Send + Sync>,
        nof_harq_procs: usize,
        max_retx: u32,
    ) -> Self {
        Self {
            rnti,
            cc,
            phy,
            harq: HarqEntity::new(rnti, nof_harq_procs, max_retx),
            dl_bytes: 0,
            ul_bytes: 0,
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn cc(&self) -> u32 {
        self.cc
    }

    pub fn harq(&self) -> &HarqEntity {
        &self.harq
    }

    pub fn phy(&self) -> &(dyn DciContextProvider + Send + Sync) {
        self.phy.as_ref()
    }

    /// Pending DL bytes
    pub fn dl_bytes(&self) -> u32 {
        self.dl_bytes
    }

    /// Pending UL bytes as last reported
    pub fn ul_bytes(&self) -> u32 {
        self.ul_bytes
    }

    pub fn set_dl_bytes(&mut self, bytes: u32) {
        self.dl_bytes = bytes;
    }

    pub fn set_ul_bytes(&mut self, bytes: u32) {
        self.ul_bytes = bytes;
    }

    /// Account for a new TB of `tbs` bits
    pub(crate) fn consume(&mut self, direction: Direction, tbs: u32) {
        let bytes = match direction {
            Direction::Downlink => &mut self.dl_bytes,
            Direction::Uplink => &mut self.ul_bytes,
        };
        *bytes = bytes.saturating_sub(tbs / 8);
    }

    /// View of this UE for the slot whose PDCCH is sent in `pdcch_slot`
    pub fn make_slot_ue<'a>(&'a self, pdcch_slot: SlotPoint, bwp: &BwpParams) -> SlotUe<'a> {
        let pdsch_slot = pdcch_slot + bwp.cfg.pdsch_k0;
        SlotUe {
            rnti: self.rnti,
            cc: self.cc,
            phy: self.phy.as_ref(),
            h_dl: None,
            h_ul: None,
            dl_bytes: self.dl_bytes,
            ul_bytes: self.ul_bytes,
            pdcch_slot,
            pdsch_slot,
            uci_slot: pdsch_slot + bwp.cfg.harq_ack_k1,
            pusch_slot: pdcch_slot + bwp.cfg.pusch_k2,
        }
    }
}

/// A UE as seen by one scheduling pass
///
/// Lives for a single slot and borrows the HARQ processes picked for it.
pub struct SlotUe<'a> {
    pub rnti: Rnti,
    pub cc: u32,
    pub phy: &'a dyn DciContextProvider,
    pub h_dl: Option<&'a HarqProcess>,
    pub h_ul: Option<&'a HarqProcess>,
    pub dl_bytes: u32,
    pub ul_bytes: u32,
    pub pdcch_slot: SlotPoint,
    pub pdsch_slot: SlotPoint,
    /// Slot of the HARQ-ACK for the PDSCH
    pub uci_slot: SlotPoint,
    pub pusch_slot: SlotPoint,
}

impl<'a> SlotUe<'a> {
    /// Bind the process of `pid` in `direction`
    pub fn with_harq(mut self, harq: &'a HarqEntity, direction: Direction, pid: u32) -> Result<Self, SchedError> {
        let h = harq.get(direction, pid)?;
        match direction {
            Direction::Downlink => self.h_dl = Some(h),
            Direction::Uplink => self.h_ul = Some(h),
        }
        Ok(self)
    }

    /// PUSCH scheduled by a RAR: Msg3 follows the RA time offset
    pub fn with_msg3_delay(mut self, msg3_delay: u32) -> Self {
        self.pusch_slot = self.pdcch_slot + msg3_delay;
        self
    }

    /// HARQ process bound for `direction`
    pub fn harq(&self, direction: Direction) -> Option<&'a HarqProcess> {
        match direction {
            Direction::Downlink => self.h_dl,
            Direction::Uplink => self.h_ul,
        }
    }

    /// Bound HARQ process, or an error naming the missing direction
    pub fn require_harq(&self, direction: Direction) -> Result<&'a HarqProcess, SchedError> {
        self.harq(direction)
            .ok_or(SchedError::NoHarqBound { rnti: self.rnti, direction })
    }
}
