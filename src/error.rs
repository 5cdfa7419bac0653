use thiserror::Error;

/// Errors produced by the correlation engine.
///
/// Nothing here is fatal to the process: every variant marks a single
/// packet or registration that could not be applied, and processing
/// continues with the next packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("field not found: {0}")]
    FieldNotFound(&'static str),

    #[error("malformed value in {field}")]
    MalformedValue { field: &'static str },

    #[error("capacity exceeded: call already holds {limit} {what}")]
    CapacityExceeded { what: &'static str, limit: usize },

    #[error("endpoint already registered")]
    DuplicateRegistration,

    #[error("dialog identifier too long ({len} bytes, max {max})")]
    IdentifierTooLong { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, CallError>;
