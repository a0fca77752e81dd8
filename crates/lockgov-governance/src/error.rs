use lockgov_staking::StakingError;
use lockgov_types::{ErrorKind, TypesError};
use thiserror::Error;

/// Errors that can occur in governance operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GovernanceError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Temporal violation: {0}")]
    TemporalViolation(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Overflow: {0}")]
    Overflow(String),

    #[error("Proposal not found: {0}")]
    ProposalNotFound(u64),

    #[error(transparent)]
    Staking(#[from] StakingError),
}

impl GovernanceError {
    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GovernanceError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            GovernanceError::Unauthorized(_) => ErrorKind::Unauthorized,
            GovernanceError::TemporalViolation(_) => ErrorKind::TemporalViolation,
            GovernanceError::StateConflict(_) => ErrorKind::StateConflict,
            GovernanceError::Overflow(_) => ErrorKind::Overflow,
            GovernanceError::ProposalNotFound(_) => ErrorKind::NotFound,
            GovernanceError::Staking(e) => e.kind(),
        }
    }
}

impl From<TypesError> for GovernanceError {
    fn from(e: TypesError) -> Self {
        GovernanceError::Staking(e.into())
    }
}
