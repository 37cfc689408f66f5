//! Domain layer - Resource model and port definitions
//!
//! This module defines the block-storage resource model and the core traits
//! (ports) that backend adapters implement.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
