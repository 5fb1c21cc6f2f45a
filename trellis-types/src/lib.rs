//! Shared type definitions for the Trellis knowledge-graph node.
//!
//! Holds the data model every other crate speaks: universal asset locators,
//! durable commands, network operations, and paranet sync records.

pub mod command;
pub mod constants;
pub mod error;
pub mod operation;
pub mod paranet;
pub mod primitives;
pub mod ual;
