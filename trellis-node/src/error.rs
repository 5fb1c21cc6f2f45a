use thiserror::Error;

/// Errors that can occur in the node.
#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum NodeError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("storage error: {0}")]
    StorageError(#[from] trellis_storage::error::StorageError),

    #[error("command error: {0}")]
    CommandError(#[from] trellis_command::error::CommandError),

    #[error("paranet sync error: {0}")]
    SyncError(#[from] trellis_paranet::error::SyncError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
