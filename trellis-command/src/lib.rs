//! Persistent command scheduling for the Trellis node.
//!
//! A command is a named, durable unit of work with a retry budget, an
//! optional period and an optional chain of follow-up stages. The
//! [`Scheduler`](scheduler::Scheduler) persists commands; the
//! [`CommandExecutor`](executor::CommandExecutor) claims ready ones, runs
//! their [`CommandHandler`](handler::CommandHandler) and applies the
//! retry / recover / continuation policy.

pub mod cleanup;
pub mod error;
pub mod executor;
pub mod handler;
pub mod registry;
pub mod scheduler;
