//! Blockchain collaborator for the Trellis node.
//!
//! The orchestration core only reads from chains: paranet membership,
//! per-collection merkle state history and replication parameters.

pub mod error;
pub mod memory;
pub mod traits;
