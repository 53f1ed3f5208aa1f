use serde::{Deserialize, Serialize};
use std::fmt;

/// unique identifier for a loan, 16 lowercase hex characters when generated
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(String);

impl LoanId {
    pub fn new(id: impl Into<String>) -> Self {
        LoanId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LoanId {
    fn from(s: String) -> Self {
        LoanId(s)
    }
}

impl From<&str> for LoanId {
    fn from(s: &str) -> Self {
        LoanId(s.to_string())
    }
}

/// status of a single week in the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeekStatus {
    /// installment not yet received
    Pending,
    /// installment received, terminal
    Paid,
}

impl fmt::Display for WeekStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeekStatus::Pending => f.write_str("Pending"),
            WeekStatus::Paid => f.write_str("Paid"),
        }
    }
}

/// one week of the repayment schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub week: u32,
    pub status: WeekStatus,
}

impl ScheduleEntry {
    pub fn pending(week: u32) -> Self {
        Self {
            week,
            status: WeekStatus::Pending,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == WeekStatus::Paid
    }
}

/// loan status, derived from the outstanding balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    /// balance still owed
    Active,
    /// outstanding reached zero, no further payments accepted
    FullyPaid,
}
