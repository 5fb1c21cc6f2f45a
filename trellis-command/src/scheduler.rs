use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

use trellis_storage::traits::CommandRepository;
use trellis_types::command::{Command, CommandData, CommandId, CommandName, CommandStatus};
use trellis_types::primitives::now_millis;

use crate::error::CommandError;

/// Front door of the command queue.
///
/// Cloning is cheap; every clone persists into the same repository and
/// wakes the same executor.
#[derive(Clone)]
pub struct Scheduler {
    repo: Arc<dyn CommandRepository>,
    wake: Arc<Notify>,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn CommandRepository>) -> Self {
        Self {
            repo,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Enqueue a command built from its kind's template.
    pub fn add(&self, name: CommandName, data: CommandData) -> Result<CommandId, CommandError> {
        self.add_command(Command::new(name, data, now_millis()))
    }

    /// Enqueue a fully built command as PENDING.
    pub fn add_command(&self, mut command: Command) -> Result<CommandId, CommandError> {
        if command.name.requires_payload() && command.data.is_empty() {
            return Err(CommandError::validation(format!(
                "{} requires a payload",
                command.name
            )));
        }
        command.status = CommandStatus::Pending;
        command.started_at = None;
        self.repo.insert_command(&command)?;
        debug!(
            command = %command.name,
            command_id = %command.id,
            delay_ms = command.delay_ms,
            period_ms = command.period_ms,
            "command scheduled"
        );
        self.wake.notify_one();
        Ok(command.id)
    }

    pub fn repository(&self) -> &Arc<dyn CommandRepository> {
        &self.repo
    }

    /// Signal raised on every enqueue.
    pub fn wake_signal(&self) -> Arc<Notify> {
        self.wake.clone()
    }
}
