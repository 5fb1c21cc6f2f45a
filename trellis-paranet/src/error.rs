use thiserror::Error;

use trellis_chain::error::ChainError;
use trellis_command::error::CommandError;
use trellis_protocol::error::ProtocolError;
use trellis_storage::error::StorageError;
use trellis_types::error::TypesError;

/// Errors raised by the paranet sync reconciler.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("command error: {0}")]
    Command(#[from] CommandError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// One state of a collection could not be replicated.
    #[error("unable to sync state {state_index} of {ual}: {reason}")]
    StateSync {
        ual: String,
        state_index: usize,
        reason: String,
    },

    /// Neither local storage nor the network holds the state.
    #[error("state {state} of {ual} not found")]
    NotFound { ual: String, state: String },

    #[error("invalid sync request: {reason}")]
    InvalidRequest { reason: String },
}

impl From<TypesError> for SyncError {
    fn from(err: TypesError) -> Self {
        SyncError::InvalidRequest {
            reason: err.to_string(),
        }
    }
}

impl From<SyncError> for CommandError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::Command(inner) => inner,
            SyncError::Protocol(inner) => inner.into(),
            SyncError::Storage(inner) => CommandError::Storage(inner),
            SyncError::InvalidRequest { reason } => CommandError::Validation { reason },
            SyncError::Chain(chain) if chain.is_transient() => {
                CommandError::Transient { reason: message }
            }
            _ => CommandError::Handler { reason: message },
        }
    }
}
