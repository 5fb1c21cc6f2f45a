use thiserror::Error;

/// Validation errors raised while building or decoding shared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    #[error("invalid UAL '{ual}': {reason}")]
    InvalidUal { ual: String, reason: String },

    #[error("invalid command payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("unknown command name: {name}")]
    UnknownCommand { name: String },

    #[error("unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("invalid operation id '{value}': {reason}")]
    InvalidOperationId { value: String, reason: String },
}
