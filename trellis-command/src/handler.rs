use async_trait::async_trait;
use tracing::warn;

use trellis_types::command::{Command, CommandData, CommandName};
use trellis_types::primitives::now_millis;

use crate::error::CommandError;

/// What a handler asks the executor to do once it returns.
///
/// Only `Repeat` keeps a recurring command alive. `Continue` and `Empty`
/// complete it, period or not.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Done; enqueue these follow-up commands.
    Continue(Vec<Command>),
    /// Re-arm this (recurring) command for its next period.
    Repeat,
    /// Done, nothing further.
    Empty,
}

/// Behaviour bound to one [`CommandName`].
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> CommandName;

    /// Run one attempt. Handlers for recurring commands must return
    /// [`CommandOutcome::Repeat`] on success or the command stops recurring.
    async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError>;

    /// Bring the system to a safe terminal state after a failure that will
    /// not be retried. Must not fail.
    async fn recover(&self, command: &Command, error: &CommandError) -> CommandOutcome {
        warn!(
            command = %command.name,
            command_id = %command.id,
            error = %error,
            "command failed without a recovery routine"
        );
        CommandOutcome::Empty
    }

    /// Called once the retry budget is spent.
    async fn retry_finished(&self, command: &Command, error: &CommandError) -> CommandOutcome {
        self.recover(command, error).await
    }
}

/// Hand control to the next stage of `command`'s sequence, overlaying
/// `extra` on the carried payload. A finished sequence yields no follow-up.
pub fn continue_sequence(command: &Command, extra: &CommandData) -> CommandOutcome {
    CommandOutcome::Continue(
        command
            .next_in_sequence(extra, now_millis())
            .into_iter()
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl CommandHandler for Noop {
        fn name(&self) -> CommandName {
            CommandName::LocalGet
        }

        async fn execute(&self, _command: &Command) -> Result<CommandOutcome, CommandError> {
            Ok(CommandOutcome::Empty)
        }
    }

    #[tokio::test]
    async fn test_default_recovery_is_empty() {
        let cmd = Command::new(CommandName::LocalGet, CommandData::new(), 0);
        let err = CommandError::handler("boom");
        assert_eq!(Noop.recover(&cmd, &err).await, CommandOutcome::Empty);
        assert_eq!(Noop.retry_finished(&cmd, &err).await, CommandOutcome::Empty);
    }

    #[test]
    fn test_continue_sequence() {
        let data = CommandData::from_value(json!({"operationId": "x"})).unwrap();
        let cmd = Command::new(CommandName::NetworkGet, data, 0)
            .with_sequence(vec![CommandName::ScheduleMessages]);
        let extra = CommandData::from_value(json!({"batchSize": 2})).unwrap();
        match continue_sequence(&cmd, &extra) {
            CommandOutcome::Continue(next) => {
                assert_eq!(next.len(), 1);
                assert_eq!(next[0].name, CommandName::ScheduleMessages);
                assert_eq!(next[0].data.get("batchSize"), Some(&json!(2)));
                assert!(next[0].sequence.is_empty());
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let tail = Command::new(CommandName::ScheduleMessages, CommandData::new(), 0);
        assert_eq!(
            continue_sequence(&tail, &CommandData::new()),
            CommandOutcome::Continue(Vec::new())
        );
    }
}
