//! Per-slot resource grid of a BWP
//!
//! Ring of slot results indexed by slot. The scheduling pass of a PDCCH slot
//! writes into that slot and the slots its PDSCH, PUSCH and HARQ-ACK land
//! in. The PHY takes each slot exactly once, after which it is closed.

use super::SchedError;
use common::slot::SlotPoint;
use interfaces::message_types::SlotResult;
use tracing::{trace, warn};

/// Number of slots kept ahead of the current PDCCH slot
pub const GRID_RING_SIZE: usize = 64;

pub struct BwpResGrid {
    cc: u32,
    slots: Vec<Option<SlotResult>>,
    current: Option<SlotPoint>,
    last_taken: Option<SlotPoint>,
}

impl BwpResGrid {
    pub fn new(cc: u32) -> Self {
        Self {
            cc,
            slots: vec![None; GRID_RING_SIZE],
            current: None,
            last_taken: None,
        }
    }

    fn index(slot: SlotPoint) -> usize {
        slot.to_uint() as usize % GRID_RING_SIZE
    }

    /// PDCCH slot currently being scheduled
    pub fn current_slot(&self) -> Option<SlotPoint> {
        self.current
    }

    /// Start scheduling `pdcch_slot`
    pub fn new_slot(&mut self, pdcch_slot: SlotPoint) {
        if let Some(current) = self.current {
            if pdcch_slot - current != 1 {
                warn!("Scheduler jumped from slot {} to {}", current, pdcch_slot);
            }
        }
        self.current = Some(pdcch_slot);
    }

    fn is_taken(&self, slot: SlotPoint) -> bool {
        self.last_taken.map_or(false, |last| slot <= last)
    }

    /// Whether `slot` still accepts allocations
    pub fn is_writable(&self, slot: SlotPoint) -> bool {
        match self.current {
            Some(current) => {
                let ahead = slot - current;
                ahead >= 0 && (ahead as usize) < GRID_RING_SIZE && !self.is_taken(slot)
            }
            None => false,
        }
    }

    /// Result of `slot` for appending allocations
    pub fn slot_mut(&mut self, slot: SlotPoint) -> Result<&mut SlotResult, SchedError> {
        let current = self.current.ok_or(SchedError::SlotClosed(slot))?;
        let ahead = slot - current;
        if ahead < 0 || self.is_taken(slot) {
            return Err(SchedError::SlotClosed(slot));
        }
        if ahead as usize >= GRID_RING_SIZE {
            return Err(SchedError::SlotOutOfRange(slot));
        }

        let cc = self.cc;
        let entry = &mut self.slots[Self::index(slot)];
        let reset = match entry.as_ref() {
            Some(result) if result.slot == slot => false,
            Some(stale) => {
                if !stale.is_empty() {
                    warn!("Dropping slot {} result never taken by the PHY", stale.slot);
                }
                true
            }
            None => true,
        };
        if reset {
            *entry = Some(SlotResult::new(slot, cc));
        }
        entry.as_mut().ok_or(SchedError::SlotClosed(slot))
    }

    /// Result of `slot`, if anything was allocated in it
    pub fn get(&self, slot: SlotPoint) -> Option<&SlotResult> {
        self.slots[Self::index(slot)]
            .as_ref()
            .filter(|result| result.slot == slot)
    }

    /// Hand the result of `slot` to the PHY and close the slot
    ///
    /// Only slots up to the current PDCCH slot are complete, and each slot is
    /// handed over once.
    pub fn take(&mut self, slot: SlotPoint) -> Result<SlotResult, SchedError> {
        let current = self.current.ok_or(SchedError::SlotNotReady(slot))?;
        if slot > current {
            return Err(SchedError::SlotNotReady(slot));
        }
        if self.is_taken(slot) {
            return Err(SchedError::SlotClosed(slot));
        }
        if current - slot >= GRID_RING_SIZE as i32 {
            return Err(SchedError::SlotOutOfRange(slot));
        }

        let result = match self.slots[Self::index(slot)].take() {
            Some(result) if result.slot == slot => result,
            _ => SlotResult::new(slot, self.cc),
        };
        self.last_taken = Some(slot);
        trace!("PHY took slot {} of cc={}", slot, self.cc);
        Ok(result)
    }
}
