use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rust_decimal::Decimal;

use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};
use crate::loan::Loan;
use crate::types::LoanId;

/// random bytes behind every generated loan id
pub const LOAN_ID_BYTES: usize = 8;

/// generate a random loan id from the operating system's secure generator
pub fn generate_loan_id() -> Result<LoanId> {
    let mut bytes = [0u8; LOAN_ID_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| BillingError::IdGeneration {
            message: e.to_string(),
        })?;

    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(LoanId::new(hex))
}

/// longest tenure accepted, ten years of weekly installments
pub const MAX_TENURE_WEEKS: u32 = 520;

fn out_of_range() -> BillingError {
    BillingError::InvalidTerms {
        message: "loan amount out of range".to_string(),
    }
}

/// total repayable amount: principal plus one-shot flat interest
pub fn initial_outstanding(principal: Money, rate: Rate) -> Result<Money> {
    principal
        .flat_interest(rate)
        .and_then(|interest| principal.checked_add(interest))
        .ok_or_else(out_of_range)
}

/// fixed weekly installment
///
/// Rounded toward zero, so every week but the last leaves a positive balance
/// and the last payment takes the remainder.
pub fn weekly_installment(loan_amount: Money, weeks: u32) -> Result<Money> {
    if weeks == 0 {
        return Err(BillingError::InvalidTerms {
            message: "loan tenure must be at least one week".to_string(),
        });
    }
    loan_amount
        .checked_div_down(Decimal::from(weeks))
        .ok_or_else(out_of_range)
}

/// create a loan with a fresh random id, stamped with the system time
pub fn create_loan(principal: Money, rate: Rate, weeks: u32) -> Result<Loan> {
    LoanBuilder::new()
        .principal(principal)
        .rate(rate)
        .weeks(weeks)
        .build()
}

/// builder for loans
#[derive(Debug, Default)]
pub struct LoanBuilder {
    id: Option<LoanId>,
    principal: Option<Money>,
    rate: Option<Rate>,
    weeks: Option<u32>,
    created_at: Option<DateTime<Utc>>,
}

impl LoanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// use an explicit id instead of generating one
    pub fn id(mut self, id: LoanId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn principal(mut self, principal: Money) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn rate(mut self, rate: Rate) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn weeks(mut self, weeks: u32) -> Self {
        self.weeks = Some(weeks);
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn build(self) -> Result<Loan> {
        let principal = self.principal.ok_or(BillingError::InvalidTerms {
            message: "Principal required".to_string(),
        })?;

        let rate = self.rate.ok_or(BillingError::InvalidTerms {
            message: "Rate required".to_string(),
        })?;

        let weeks = self.weeks.ok_or(BillingError::InvalidTerms {
            message: "Tenure in weeks required".to_string(),
        })?;

        if !principal.is_positive() {
            return Err(BillingError::InvalidTerms {
                message: format!("principal must be greater than zero, got {}", principal),
            });
        }

        if weeks > MAX_TENURE_WEEKS {
            return Err(BillingError::InvalidTerms {
                message: format!(
                    "loan tenure cannot exceed {} weeks, got {}",
                    MAX_TENURE_WEEKS, weeks
                ),
            });
        }

        if rate.is_negative() {
            return Err(BillingError::InvalidTerms {
                message: format!("interest rate cannot be negative, got {}", rate),
            });
        }

        let loan_amount = initial_outstanding(principal, rate)?;
        let installment = weekly_installment(loan_amount, weeks)?;

        let id = match self.id {
            Some(id) => id,
            None => generate_loan_id()?,
        };

        Ok(Loan::originate(
            id,
            principal,
            rate,
            weeks,
            loan_amount,
            installment,
            self.created_at.unwrap_or_else(Utc::now),
        ))
    }
}
