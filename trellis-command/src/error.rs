use thiserror::Error;

use trellis_storage::error::StorageError;
use trellis_types::command::CommandName;
use trellis_types::error::TypesError;

/// Errors raised while scheduling or executing commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Malformed command or payload. Never retried.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// The handler failed; the executor decides whether to retry.
    #[error("handler error: {reason}")]
    Handler { reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A peer or collaborator was temporarily unreachable.
    #[error("transient error: {reason}")]
    Transient { reason: String },

    #[error("retry budget exhausted for {name}: {reason}")]
    RetryBudgetExhausted { name: CommandName, reason: String },

    #[error("no handler registered for {name}")]
    NoHandler { name: CommandName },
}

impl CommandError {
    pub fn validation(reason: impl Into<String>) -> Self {
        CommandError::Validation {
            reason: reason.into(),
        }
    }

    pub fn handler(reason: impl Into<String>) -> Self {
        CommandError::Handler {
            reason: reason.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, CommandError::Validation { .. })
    }
}

impl From<TypesError> for CommandError {
    fn from(err: TypesError) -> Self {
        CommandError::Validation {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_error_is_validation() {
        let err: CommandError = TypesError::InvalidPayload {
            reason: "missing field `operationId`".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(err.to_string().contains("operationId"));
    }

    #[test]
    fn test_storage_error_from() {
        let err: CommandError = StorageError::NotFound {
            key: "k".to_string(),
        }
        .into();
        assert!(matches!(err, CommandError::Storage(_)));
        assert!(!err.is_validation());
    }
}
