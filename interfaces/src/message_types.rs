//! Slot results handed from the MAC scheduler to the PHY
//!
//! One [`SlotResult`] describes everything to transmit or receive in a slot:
//! PDCCHs with their DCIs, PDSCH and PUSCH allocations, RAR payloads and the
//! HARQ-ACK occasions expected on PUCCH/PUSCH.

use crate::InterfaceError;
use bytes::Bytes;
use common::dci::{DciDl, DciUl, RntiType};
use common::slot::SlotPoint;
use common::types::Rnti;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// PDCCH carrying a DL assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcchDl {
    pub dci: DciDl,
}

/// PDCCH carrying a UL grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcchUl {
    pub dci: DciUl,
}

/// Transport block allocation on PDSCH or PUSCH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchAlloc {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    /// HARQ process id, meaningless for SI and RAR
    pub pid: u32,
    /// PRB usage over the BWP, `prb_mask[i]` for PRB i
    pub prb_mask: Vec<bool>,
    pub mcs: u32,
    /// Transport block size in bits
    pub tbs: u32,
    pub rv: u32,
    pub ndi: bool,
    /// Logical channel ids multiplexed in the TB
    #[serde(default)]
    pub lcids: Vec<u32>,
}

impl SchAlloc {
    /// Number of allocated PRBs
    pub fn nof_prb(&self) -> usize {
        self.prb_mask.iter().filter(|used| **used).count()
    }

    /// First contiguous run of allocated PRBs as `[start, stop)`
    pub fn first_prb_run(&self) -> (usize, usize) {
        let start = self
            .prb_mask
            .iter()
            .position(|used| *used)
            .unwrap_or(self.prb_mask.len());
        let stop = self.prb_mask[start..]
            .iter()
            .position(|used| !*used)
            .map_or(self.prb_mask.len(), |len| start + len);
        (start, stop)
    }
}

/// One UL grant of a RAR, addressed to a detected preamble
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarGrant {
    pub preamble_idx: u32,
    pub ta_cmd: u32,
    pub tc_rnti: Rnti,
    /// Msg3 grant, format RAR
    pub msg3_dci: DciUl,
}

/// RAR PDSCH payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarAlloc {
    pub ra_rnti: Rnti,
    pub grants: Vec<RarGrant>,
}

/// Expected HARQ-ACK bit for a PDSCH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarqAckOccasion {
    pub rnti: Rnti,
    pub pid: u32,
    pub pdsch_slot: SlotPoint,
}

/// DL part of a slot result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlSlotResult {
    pub pdcch_dl: Vec<PdcchDl>,
    pub pdcch_ul: Vec<PdcchUl>,
    pub pdsch: Vec<SchAlloc>,
    pub rar: Vec<RarAlloc>,
}

/// UL part of a slot result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UlSlotResult {
    pub pusch: Vec<SchAlloc>,
    pub harq_ack: Vec<HarqAckOccasion>,
}

/// Everything scheduled for one slot of one carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotResult {
    pub slot: SlotPoint,
    pub cc: u32,
    pub dl: DlSlotResult,
    pub ul: UlSlotResult,
}

impl SlotResult {
    /// Empty result for `slot`
    pub fn new(slot: SlotPoint, cc: u32) -> Self {
        Self {
            slot,
            cc,
            dl: DlSlotResult::default(),
            ul: UlSlotResult::default(),
        }
    }

    /// True if nothing is scheduled in the slot
    pub fn is_empty(&self) -> bool {
        self.dl.pdcch_dl.is_empty()
            && self.dl.pdcch_ul.is_empty()
            && self.dl.pdsch.is_empty()
            && self.dl.rar.is_empty()
            && self.ul.pusch.is_empty()
            && self.ul.harq_ack.is_empty()
    }
}

/// Serialize a slot result into a frame for the PHY
pub fn encode_slot_result(result: &SlotResult) -> Result<Bytes, InterfaceError> {
    let encoded = bincode::serialize(result)?;
    trace!("Encoded slot result {} into {} bytes", result.slot, encoded.len());
    Ok(Bytes::from(encoded))
}

/// Deserialize a slot result frame
pub fn decode_slot_result(frame: &[u8]) -> Result<SlotResult, InterfaceError> {
    if frame.is_empty() {
        return Err(InterfaceError::InvalidMessage);
    }
    Ok(bincode::deserialize(frame)?)
}
