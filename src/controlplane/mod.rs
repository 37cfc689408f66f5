//! Control plane
//!
//! The request layer that accepts lifecycle operations, persists provisional
//! states, and the orchestrator that converges them to terminal states on
//! background executions.

pub mod entries;
pub mod orchestrator;

pub use entries::*;
pub use orchestrator::*;
