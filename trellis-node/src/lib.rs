//! Trellis node: configuration, CLI, metrics and the wiring that joins the
//! command executor, the network protocol and the paranet reconciler.

pub mod cli;
pub mod config;
pub mod dev;
pub mod error;
pub mod metrics;
pub mod node;
