//! Medium Access Control (MAC) Layer Implementation
//!
//! Implements the slot scheduler of the 5G NR MAC layer according to 3GPP
//! TS 38.321, TS 38.212 and TS 38.214

pub mod bwp;
pub mod dci_builder;
pub mod diagnostics;
pub mod harq;
pub mod prb_grant;
pub mod res_grid;
pub mod scheduler;
pub mod slot_ue;

use crate::LayerError;
use async_trait::async_trait;
use common::slot::SlotPoint;
use common::types::{CellId, Direction, Rnti, SubcarrierSpacing};
use interfaces::message_types::SlotResult;
use interfaces::InterfaceError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub use bwp::{BwpConfig, BwpParams};
pub use harq::{HarqEntity, HarqPhase, HarqProcess};
pub use prb_grant::{PrbGrant, PrbInterval, RbgBitmap};
pub use scheduler::{
    GrantKind, MacScheduler, Msg3Decision, RarDecision, SchedConfig, Sib1SchedConfig, SlotDecisions, SlotReport,
    TbParams, UeGrant,
};

/// Scheduling errors. Each one is fatal for the grant being built.
#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Invalid {direction} HARQ pid={pid}, {nof_procs} processes configured")]
    InvalidHarqId {
        direction: Direction,
        pid: u32,
        nof_procs: usize,
    },

    #[error("rnti={rnti} {direction} HARQ pid={pid} has no TB to retransmit")]
    HarqNotActive {
        rnti: Rnti,
        direction: Direction,
        pid: u32,
    },

    #[error("CORESET {0} not configured")]
    MissingCoreset(u8),

    #[error("Search space {0} not configured")]
    MissingSearchSpace(u32),

    #[error("RA search space not configured")]
    MissingRaSearchSpace,

    #[error("PUSCH RA time domain list is empty")]
    MissingRaTimeConfig,

    #[error("Invalid PDCCH candidate for rnti={rnti}: {source}")]
    InvalidCandidate {
        rnti: Rnti,
        #[source]
        source: InterfaceError,
    },

    #[error("Unknown UE rnti={0}")]
    UnknownUe(Rnti),

    #[error("UE rnti={0} already exists")]
    DuplicateUe(Rnti),

    #[error("No {direction} HARQ process bound to rnti={rnti}")]
    NoHarqBound { rnti: Rnti, direction: Direction },

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("rnti={rnti} already has a {direction} grant in this slot")]
    DuplicateGrant { rnti: Rnti, direction: Direction },

    #[error("RAR ra-rnti={0} has no Msg3 grant")]
    EmptyRar(Rnti),

    #[error("Slot {0} is closed")]
    SlotClosed(SlotPoint),

    #[error("Slot {0} is outside the resource grid")]
    SlotOutOfRange(SlotPoint),

    #[error("Slot {0} is not scheduled yet")]
    SlotNotReady(SlotPoint),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// MAC layer configuration
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Cell ID
    pub cell_id: CellId,
    /// Subcarrier spacing
    pub scs: SubcarrierSpacing,
    /// Component carrier index
    pub cc: u32,
    /// Active BWP
    pub bwp: BwpConfig,
    /// Scheduler parameters
    pub sched: SchedConfig,
}

/// MAC-PHY interface for scheduling information
#[async_trait]
pub trait MacPhyInterface: Send + Sync {
    /// Take the scheduling result of a slot; each slot is handed out once
    async fn get_slot_result(&self, slot: SlotPoint) -> Result<SlotResult, LayerError>;
}

/// MAC layer wrapping the slot scheduler
pub struct MacLayer {
    config: MacConfig,
    scheduler: Arc<Mutex<MacScheduler>>,
    initialized: bool,
}

impl MacLayer {
    /// Create a new MAC layer instance
    pub fn new(config: MacConfig) -> Result<Self, LayerError> {
        let bwp = BwpParams::new(config.cc, config.scs, config.bwp.clone())?;
        let scheduler = MacScheduler::new(bwp, config.sched.clone())?;

        Ok(Self {
            config,
            scheduler: Arc::new(Mutex::new(scheduler)),
            initialized: false,
        })
    }

    pub async fn initialize(&mut self) -> Result<(), LayerError> {
        info!("Initializing MAC layer");
        debug!("MAC config: cell_id={}, scs={:?}, cc={}, bwp={} RBs",
               self.config.cell_id.0,
               self.config.scs,
               self.config.cc,
               self.config.bwp.rb_width);

        self.initialized = true;
        info!("MAC layer initialized successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), LayerError> {
        info!("Shutting down MAC layer");
        self.initialized = false;
        Ok(())
    }

    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    /// Shared handle to the scheduler
    pub fn scheduler(&self) -> Arc<Mutex<MacScheduler>> {
        Arc::clone(&self.scheduler)
    }

    /// Lock the scheduler
    pub async fn lock(&self) -> Result<MutexGuard<'_, MacScheduler>, LayerError> {
        if !self.initialized {
            return Err(LayerError::NotInitialized);
        }
        Ok(self.scheduler.lock().await)
    }

    /// Run the scheduling pass of `pdcch_slot`
    pub async fn run_slot(&self, pdcch_slot: SlotPoint, decisions: &SlotDecisions) -> Result<SlotReport, LayerError> {
        let mut scheduler = self.lock().await?;
        Ok(scheduler.run_slot(pdcch_slot, decisions))
    }
}

#[async_trait]
impl MacPhyInterface for MacLayer {
    async fn get_slot_result(&self, slot: SlotPoint) -> Result<SlotResult, LayerError> {
        let mut scheduler = self.lock().await?;
        Ok(scheduler.take_slot_result(slot)?)
    }
}
