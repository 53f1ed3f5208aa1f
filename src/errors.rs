use std::path::PathBuf;

use thiserror::Error;

use crate::decimal::Money;
use crate::types::LoanId;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("loan with id {id} not found")]
    NotFound {
        id: LoanId,
    },

    #[error("invalid payment week {week}, loan tenure is 1 to {weeks} weeks")]
    InvalidWeek {
        week: u32,
        weeks: u32,
    },

    #[error("loan fully paid")]
    AlreadySettled,

    #[error("invalid payment amount: expected {expected:.2}, provided {provided}")]
    AmountMismatch {
        expected: Money,
        provided: Money,
    },

    #[error("week {week} is already paid")]
    AlreadyPaid {
        week: u32,
    },

    #[error("invalid loan terms: {message}")]
    InvalidTerms {
        message: String,
    },

    #[error("loan id generation failed: {message}")]
    IdGeneration {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("corrupt ledger snapshot at {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("ledger storage unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// fieldless discriminant of [`BillingError`] for callers that branch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidWeek,
    AlreadySettled,
    AmountMismatch,
    AlreadyPaid,
    InvalidTerms,
    IdGeneration,
    InvalidConfiguration,
    Corrupt,
    IoFailure,
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::NotFound { .. } => ErrorKind::NotFound,
            BillingError::InvalidWeek { .. } => ErrorKind::InvalidWeek,
            BillingError::AlreadySettled => ErrorKind::AlreadySettled,
            BillingError::AmountMismatch { .. } => ErrorKind::AmountMismatch,
            BillingError::AlreadyPaid { .. } => ErrorKind::AlreadyPaid,
            BillingError::InvalidTerms { .. } => ErrorKind::InvalidTerms,
            BillingError::IdGeneration { .. } => ErrorKind::IdGeneration,
            BillingError::InvalidConfiguration { .. } => ErrorKind::InvalidConfiguration,
            BillingError::Corrupt { .. } => ErrorKind::Corrupt,
            BillingError::Io(_) | BillingError::Serialization(_) => ErrorKind::IoFailure,
        }
    }

    /// true for failures of the ledger itself rather than of the loan rules
    pub fn is_storage(&self) -> bool {
        matches!(self.kind(), ErrorKind::Corrupt | ErrorKind::IoFailure)
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
