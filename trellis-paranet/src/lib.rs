//! Paranet sync reconciler.
//!
//! Every known paranet gets a recurring `paranetSyncCommand`. Each run
//! discovers member collections registered on chain since the last run,
//! then replicates a bounded batch of not-yet-synced collections, state by
//! state, into the paranet's own storage partition.

pub mod command;
pub mod config;
pub mod discover;
pub mod error;
pub mod state_sync;
