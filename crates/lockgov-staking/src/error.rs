use lockgov_types::{ErrorKind, TypesError};
use thiserror::Error;

/// Errors that can occur in stake ledger operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StakingError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Temporal violation: {0}")]
    TemporalViolation(String),

    #[error("Amount overflow: {0}")]
    Overflow(String),

    #[error("Amount underflow: {0}")]
    Underflow(String),

    #[error("Vault transfer failed: {0}")]
    Vault(String),

    #[error("Corrupt checkpoint data: {0}")]
    Corrupt(String),
}

impl StakingError {
    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StakingError::InvalidParameter(_) | StakingError::Corrupt(_) => {
                ErrorKind::InvalidParameter
            }
            StakingError::TemporalViolation(_) => ErrorKind::TemporalViolation,
            StakingError::Overflow(_) => ErrorKind::Overflow,
            StakingError::Underflow(_) => ErrorKind::Underflow,
            StakingError::Vault(_) => ErrorKind::ExecutionFailed,
        }
    }
}

impl From<TypesError> for StakingError {
    fn from(e: TypesError) -> Self {
        match e {
            TypesError::AmountOverflow => StakingError::Overflow(e.to_string()),
            TypesError::AmountUnderflow => StakingError::Underflow(e.to_string()),
            other => StakingError::InvalidParameter(other.to_string()),
        }
    }
}
