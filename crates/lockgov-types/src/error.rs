use thiserror::Error;

/// Protocol-wide error taxonomy.
///
/// Every crate-level error maps onto exactly one kind so callers can decide
/// how to react without matching on crate-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Zero address/amount, malformed action lists.
    InvalidParameter,
    /// Caller lacks the required role or voting power.
    Unauthorized,
    /// Operation outside its permitted time window.
    TemporalViolation,
    /// Duplicate vote, queued-action collision, terminal proposal.
    StateConflict,
    /// Fixed-width capacity exceeded.
    Overflow,
    /// Subtraction below zero.
    Underflow,
    /// A dispatched action failed downstream.
    ExecutionFailed,
    /// Unknown identifier.
    NotFound,
    /// Persistence layer failure.
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::TemporalViolation => "temporal violation",
            ErrorKind::StateConflict => "state conflict",
            ErrorKind::Overflow => "overflow",
            ErrorKind::Underflow => "underflow",
            ErrorKind::ExecutionFailed => "execution failed",
            ErrorKind::NotFound => "not found",
            ErrorKind::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in type operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),

    #[error("Invalid address length: expected 20, got {0}")]
    InvalidAddressLength(usize),

    #[error("Invalid hash length: expected 32, got {0}")]
    InvalidHashLength(usize),

    #[error("Amount overflow")]
    AmountOverflow,

    #[error("Amount underflow")]
    AmountUnderflow,

    #[error("Invalid amount string: {0}")]
    InvalidAmountString(String),

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Bech32 error: {0}")]
    Bech32Error(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TypesError {
    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TypesError::AmountOverflow => ErrorKind::Overflow,
            TypesError::AmountUnderflow => ErrorKind::Underflow,
            _ => ErrorKind::InvalidParameter,
        }
    }
}

impl From<hex::FromHexError> for TypesError {
    fn from(e: hex::FromHexError) -> Self {
        TypesError::InvalidHex(e.to_string())
    }
}
