//! Storage layer for the Trellis node.
//!
//! Provides the repository contracts the orchestration engine persists its
//! state through ([`CommandRepository`](traits::CommandRepository),
//! [`OperationRepository`](traits::OperationRepository),
//! [`ParanetKcRepository`](traits::ParanetKcRepository)) with memory and
//! SQLite backends, plus the knowledge-store contract and an in-memory
//! implementation of it.

pub mod error;
pub mod knowledge;
pub mod memory;
pub mod sqlite;
pub mod traits;
