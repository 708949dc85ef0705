//! MAC/PHY Boundary Library
//!
//! This crate defines what the scheduler exchanges with the physical layer:
//! the PHY configuration it queries for PDCCH candidate contexts and the slot
//! results it hands over for transmission.

pub mod phy_config;
pub mod message_types;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Invalid message format")]
    InvalidMessage,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown search space {0}")]
    UnknownSearchSpace(u32),

    #[error("Unknown CORESET {0}")]
    UnknownCoreset(u8),

    #[error("Invalid PDCCH candidate: {0}")]
    InvalidCandidate(String),
}
