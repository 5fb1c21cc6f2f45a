//! Network operation protocol for the Trellis node.
//!
//! An operation (GET, PUBLISH or UPDATE) fans a request out to peers in
//! bounded rounds and decides the outcome from partial replies:
//!
//! - [`strategy`] resolves batch size, ack quorum, keywords and candidate
//!   peers per operation kind.
//! - [`tally`] is the per-keyword reply counter and completion rule.
//! - [`coordinator`] owns live tallies, dispatches rounds and persists the
//!   outcome.
//! - [`commands`] are the command handlers that drive an operation through
//!   the executor; [`service`] is the entry point for callers.

pub mod commands;
pub mod coordinator;
pub mod error;
pub mod network;
pub mod request;
pub mod service;
pub mod sim;
pub mod strategy;
pub mod tally;
