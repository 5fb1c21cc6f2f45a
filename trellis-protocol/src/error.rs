use thiserror::Error;

use trellis_chain::error::ChainError;
use trellis_command::error::CommandError;
use trellis_storage::error::StorageError;
use trellis_types::error::TypesError;

/// Errors raised by the network operation protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Peer unreachable or too slow. Counted as a failed ack.
    #[error("peer {peer} unreachable: {reason}")]
    TransientNetwork { peer: String, reason: String },

    /// Peer answered but refused the request.
    #[error("peer {peer} rejected request: {reason}")]
    PeerRejected { peer: String, reason: String },

    #[error("no peers found for keyword {keyword}")]
    NoPeers { keyword: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("command error: {0}")]
    Command(#[from] CommandError),
}

impl From<TypesError> for ProtocolError {
    fn from(err: TypesError) -> Self {
        ProtocolError::InvalidRequest {
            reason: err.to_string(),
        }
    }
}

impl From<ProtocolError> for CommandError {
    fn from(err: ProtocolError) -> Self {
        let message = err.to_string();
        match err {
            ProtocolError::Command(inner) => inner,
            ProtocolError::Storage(inner) => CommandError::Storage(inner),
            ProtocolError::InvalidRequest { reason } => CommandError::Validation { reason },
            ProtocolError::TransientNetwork { .. } => CommandError::Transient { reason: message },
            ProtocolError::Chain(chain) if chain.is_transient() => {
                CommandError::Transient { reason: message }
            }
            _ => CommandError::Handler { reason: message },
        }
    }
}
