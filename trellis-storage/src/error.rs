use thiserror::Error;

use trellis_types::error::TypesError;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {key}")]
    NotFound { key: String },

    #[error("Write error: {reason}")]
    WriteError { reason: String },

    #[error("Read error: {reason}")]
    ReadError { reason: String },

    #[error("SQLite error: {reason}")]
    SqliteError { reason: String },

    #[error("Serialization error: {reason}")]
    SerializationError { reason: String },

    #[error("Deserialization error: {reason}")]
    DeserializationError { reason: String },

    #[error("Knowledge store error: {reason}")]
    KnowledgeStoreError { reason: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::SqliteError {
            reason: err.to_string(),
        }
    }
}

impl From<TypesError> for StorageError {
    fn from(err: TypesError) -> Self {
        StorageError::DeserializationError {
            reason: err.to_string(),
        }
    }
}
