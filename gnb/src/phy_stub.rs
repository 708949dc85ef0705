//! PHY stand-in
//!
//! Takes every slot result over the MAC-PHY interface, runs it through the
//! wire codec and answers each HARQ-ACK occasion and PUSCH with random
//! feedback.

use anyhow::Context;
use common::dci::RntiType;
use common::slot::SlotPoint;
use common::types::Rnti;
use interfaces::message_types::{decode_slot_result, encode_slot_result, SlotResult};
use layers::mac::MacPhyInterface;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// Feedback reported by the PHY for a received slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// HARQ-ACK bit of a PDSCH
    DlAck { rnti: Rnti, pid: u32, ack: bool },
    /// CRC of a decoded PUSCH
    UlCrc { rnti: Rnti, rnti_type: RntiType, pid: u32, crc: bool },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PhyStats {
    pub nof_slots: u64,
    pub nof_bytes: u64,
}

pub struct PhyStub {
    rng: StdRng,
    nack_prob: f64,
    dump_slots: bool,
    stats: PhyStats,
}

impl PhyStub {
    pub fn new(nack_prob: f64, dump_slots: bool, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            nack_prob: nack_prob.clamp(0.0, 1.0),
            dump_slots,
            stats: PhyStats::default(),
        }
    }

    pub fn stats(&self) -> PhyStats {
        self.stats
    }

    /// Encode `result` as it would cross the MAC-PHY boundary and generate
    /// its feedback
    pub fn process(&mut self, result: &SlotResult) -> anyhow::Result<Vec<Feedback>> {
        let frame = encode_slot_result(result)?;
        let decoded = decode_slot_result(&frame).context("Slot result frame does not decode")?;
        self.stats.nof_slots += 1;
        self.stats.nof_bytes += frame.len() as u64;

        if self.dump_slots && !decoded.is_empty() {
            info!("PHY slot {}: {}", decoded.slot, serde_json::to_string(&decoded)?);
        }

        let mut feedback = Vec::with_capacity(decoded.ul.harq_ack.len() + decoded.ul.pusch.len());
        for occasion in &decoded.ul.harq_ack {
            let ack = !self.rng.gen_bool(self.nack_prob);
            feedback.push(Feedback::DlAck { rnti: occasion.rnti, pid: occasion.pid, ack });
        }
        for pusch in &decoded.ul.pusch {
            let crc = !self.rng.gen_bool(self.nack_prob);
            feedback.push(Feedback::UlCrc { rnti: pusch.rnti, rnti_type: pusch.rnti_type, pid: pusch.pid, crc });
        }
        trace!("PHY slot {}: {} bytes, {} feedback reports", decoded.slot, frame.len(), feedback.len());
        Ok(feedback)
    }

    /// Serve slots until the slot channel closes
    pub async fn run<M>(
        mut self,
        mac: Arc<M>,
        mut slots: mpsc::Receiver<SlotPoint>,
        feedback_tx: mpsc::UnboundedSender<Feedback>,
    ) -> PhyStats
    where
        M: MacPhyInterface + ?Sized,
    {
        while let Some(slot) = slots.recv().await {
            let result = match mac.get_slot_result(slot).await {
                Ok(result) => result,
                Err(e) => {
                    error!("PHY failed to get slot {}: {}", slot, e);
                    continue;
                }
            };
            match self.process(&result) {
                Ok(feedback) => {
                    for report in feedback {
                        if feedback_tx.send(report).is_err() {
                            debug!("Feedback channel closed");
                            return self.stats;
                        }
                    }
                }
                Err(e) => error!("PHY failed to process slot {}: {}", slot, e),
            }
        }
        debug!("PHY stub stopped after {} slots", self.stats.nof_slots);
        self.stats
    }
}
