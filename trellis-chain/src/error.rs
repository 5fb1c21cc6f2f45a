use thiserror::Error;

/// Errors returned by blockchain reads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The RPC endpoint failed or is unreachable.
    #[error("blockchain read failed on {blockchain}: {reason}")]
    BlockchainRead { blockchain: String, reason: String },

    /// No paranet registered under this id.
    #[error("unknown paranet {paranet_id} on {blockchain}")]
    UnknownParanet {
        blockchain: String,
        paranet_id: String,
    },

    /// No knowledge collection at these coordinates.
    #[error("unknown knowledge collection {contract}/{token_id} on {blockchain}")]
    UnknownCollection {
        blockchain: String,
        contract: String,
        token_id: u64,
    },
}

impl ChainError {
    /// Whether retrying the same read later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::BlockchainRead { .. })
    }
}
