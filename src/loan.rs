use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};
use crate::events::{Event, EventStore};
use crate::types::{LoanId, LoanStatus, ScheduleEntry, WeekStatus};

/// number of weeks looked back from the reference week when checking delinquency
pub const DELINQUENCY_LOOKBACK_WEEKS: u32 = 2;

/// a weekly flat-interest loan and its repayment state
///
/// Terms (`principal`, `rate`, `weeks`) and the amounts derived from them are
/// fixed at origination. Only `outstanding`, the schedule statuses, the
/// payment ledger and the cached delinquency flag change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    id: LoanId,
    principal: Money,
    rate: Rate,
    weeks: u32,
    loan_amount: Money,
    outstanding: Money,
    weekly_installment: Money,
    schedule: Vec<ScheduleEntry>,
    delinquent: bool,
    #[serde(default)]
    payments: BTreeMap<u32, Money>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    last_payment_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    events: EventStore,
}

impl Loan {
    /// originate a loan from already validated terms
    pub(crate) fn originate(
        id: LoanId,
        principal: Money,
        rate: Rate,
        weeks: u32,
        loan_amount: Money,
        weekly_installment: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        let schedule = (1..=weeks).map(ScheduleEntry::pending).collect();

        let mut loan = Self {
            id,
            principal,
            rate,
            weeks,
            loan_amount,
            outstanding: loan_amount,
            weekly_installment,
            schedule,
            delinquent: false,
            payments: BTreeMap::new(),
            created_at,
            last_payment_at: None,
            events: EventStore::new(),
        };

        loan.events.emit(Event::LoanCreated {
            loan_id: loan.id.clone(),
            principal,
            loan_amount,
            weekly_installment,
            weeks,
        });

        loan
    }

    /// apply a weekly installment stamped with the current system time
    pub fn apply_payment(&mut self, week: u32, amount: Money) -> Result<()> {
        self.apply_payment_at(week, amount, Utc::now())
    }

    /// apply a weekly installment
    ///
    /// Rejections are checked in order: week outside the tenure, loan already
    /// settled, amount different from the installment, week already paid.
    /// A rejected payment leaves the loan untouched.
    pub fn apply_payment_at(
        &mut self,
        week: u32,
        amount: Money,
        paid_at: DateTime<Utc>,
    ) -> Result<()> {
        if week < 1 || week > self.weeks {
            return Err(BillingError::InvalidWeek {
                week,
                weeks: self.weeks,
            });
        }

        if self.outstanding.is_zero() {
            return Err(BillingError::AlreadySettled);
        }

        if amount != self.weekly_installment {
            return Err(BillingError::AmountMismatch {
                expected: self.weekly_installment,
                provided: amount,
            });
        }

        let entry = self.schedule.iter().position(|e| e.week == week);
        if let Some(index) = entry {
            if self.schedule[index].is_paid() {
                return Err(BillingError::AlreadyPaid { week });
            }
        }

        self.payments.insert(week, amount);
        self.outstanding = (self.outstanding - amount).max(Money::ZERO);
        if let Some(index) = entry {
            self.schedule[index].status = WeekStatus::Paid;
        }
        self.last_payment_at = Some(paid_at);

        // the final installment absorbs the rounding remainder of loan_amount / weeks
        if self.pending_weeks() == 0 {
            self.outstanding = Money::ZERO;
        }

        self.events.emit(Event::PaymentReceived {
            loan_id: self.id.clone(),
            week,
            amount,
            outstanding: self.outstanding,
            timestamp: paid_at,
        });

        if self.outstanding.is_zero() {
            self.events.emit(Event::LoanSettled {
                loan_id: self.id.clone(),
                final_week: week,
                timestamp: paid_at,
            });
        }

        self.is_delinquent(week);

        Ok(())
    }

    /// current outstanding balance
    pub fn outstanding_amount(&self) -> Money {
        self.outstanding
    }

    /// full schedule in week order
    pub fn generate_schedule(&self) -> Vec<ScheduleEntry> {
        self.schedule.clone()
    }

    /// check delinquency at `reference_week` and cache the result on the loan
    pub fn is_delinquent(&mut self, reference_week: u32) -> bool {
        let delinquent = self.delinquency_at(reference_week);

        if delinquent != self.delinquent {
            self.events.emit(Event::DelinquencyChanged {
                loan_id: self.id.clone(),
                reference_week,
                delinquent,
            });
        }

        self.delinquent = delinquent;
        delinquent
    }

    /// delinquency at `reference_week` without touching the cached flag
    ///
    /// Walks the weeks in `[reference_week - 2, reference_week)` in ascending
    /// order. A pending week extends the missed streak, a paid week resets it.
    /// The borrower is delinquent when the streak ends at two or more.
    pub fn delinquency_at(&self, reference_week: u32) -> bool {
        let lower = reference_week.saturating_sub(DELINQUENCY_LOOKBACK_WEEKS);

        let mut window: Vec<&ScheduleEntry> = self
            .schedule
            .iter()
            .filter(|e| e.week >= lower && e.week < reference_week)
            .collect();
        window.sort_by_key(|e| e.week);

        let mut missed = 0;
        for entry in window {
            match entry.status {
                WeekStatus::Pending => missed += 1,
                WeekStatus::Paid => missed = 0,
            }
        }

        missed >= DELINQUENCY_LOOKBACK_WEEKS
    }

    pub fn status(&self) -> LoanStatus {
        if self.outstanding.is_zero() {
            LoanStatus::FullyPaid
        } else {
            LoanStatus::Active
        }
    }

    pub fn paid_weeks(&self) -> usize {
        self.schedule.iter().filter(|e| e.is_paid()).count()
    }

    pub fn pending_weeks(&self) -> usize {
        self.schedule.iter().filter(|e| !e.is_paid()).count()
    }

    pub fn id(&self) -> &LoanId {
        &self.id
    }

    pub fn principal(&self) -> Money {
        self.principal
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn weeks(&self) -> u32 {
        self.weeks
    }

    pub fn loan_amount(&self) -> Money {
        self.loan_amount
    }

    pub fn weekly_installment(&self) -> Money {
        self.weekly_installment
    }

    /// last computed delinquency, see [`Loan::is_delinquent`]
    pub fn delinquent(&self) -> bool {
        self.delinquent
    }

    pub fn payments(&self) -> &BTreeMap<u32, Money> {
        &self.payments
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_payment_at(&self) -> Option<DateTime<Utc>> {
        self.last_payment_at
    }

    /// drain events emitted since the last call
    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    /// get json representation of the persisted record
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }
}

// events are transient and never part of a loan's identity
impl PartialEq for Loan {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.principal == other.principal
            && self.rate == other.rate
            && self.weeks == other.weeks
            && self.loan_amount == other.loan_amount
            && self.outstanding == other.outstanding
            && self.weekly_installment == other.weekly_installment
            && self.schedule == other.schedule
            && self.delinquent == other.delinquent
            && self.payments == other.payments
            && self.created_at == other.created_at
            && self.last_payment_at == other.last_payment_at
    }
}
