use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use trellis_storage::traits::CommandRepository;
use trellis_types::command::{Command, CommandName};
use trellis_types::primitives::now_millis;

use crate::error::CommandError;
use crate::handler::{CommandHandler, CommandOutcome};

/// Recurring job that purges finished one-shot commands past their TTL.
pub struct CommandsCleanupHandler {
    repo: Arc<dyn CommandRepository>,
    ttl: Duration,
}

impl CommandsCleanupHandler {
    pub fn new(repo: Arc<dyn CommandRepository>, ttl: Duration) -> Self {
        Self { repo, ttl }
    }
}

#[async_trait]
impl CommandHandler for CommandsCleanupHandler {
    fn name(&self) -> CommandName {
        CommandName::CommandsCleanup
    }

    async fn execute(&self, _command: &Command) -> Result<CommandOutcome, CommandError> {
        let cutoff = now_millis().saturating_sub(self.ttl.as_millis() as u64);
        let removed = self.repo.remove_finished_commands(cutoff)?;
        if removed > 0 {
            info!(removed, "purged finished commands");
        }
        Ok(CommandOutcome::Repeat)
    }

    async fn recover(&self, _command: &Command, _error: &CommandError) -> CommandOutcome {
        CommandOutcome::Repeat
    }
}
