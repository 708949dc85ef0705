//! Common Utilities and Types Library
//!
//! This crate provides shared types and utilities used across the scheduler,
//! the PHY boundary and the gNB binary.

pub mod types;
pub mod slot;
pub mod dci;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use slot::SlotPoint;
pub use dci::*;
pub use utils::*;
