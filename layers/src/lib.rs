//! Protocol Stack Layers Library
//!
//! This crate implements the 5G NR MAC scheduling core according to 3GPP
//! Release 16: HARQ bookkeeping, PRB grant encoding and DCI generation.

pub mod mac;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Layer not initialized")]
    NotInitialized,

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] mac::SchedError),

    #[error("PHY interface error: {0}")]
    Interface(#[from] interfaces::InterfaceError),
}
