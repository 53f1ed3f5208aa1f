use hourglass_rs::{SafeTimeProvider, TimeSource};
use tracing::{debug, info, warn};

use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};
use crate::events::Event;
use crate::factory::{generate_loan_id, LoanBuilder};
use crate::loan::Loan;
use crate::repository::LoanRepository;
use crate::types::{LoanId, ScheduleEntry};

/// attempts at drawing an unused loan id before giving up
pub const DEFAULT_MAX_ID_ATTEMPTS: u32 = 5;

/// billing operations over a loan repository
///
/// Every mutating call is one repository call (`insert_new` or `update`), so
/// the load, the rule checks and the save happen under the repository's lock.
pub struct BillingEngine<R: LoanRepository> {
    repository: R,
    time: SafeTimeProvider,
    max_id_attempts: u32,
}

impl<R: LoanRepository> BillingEngine<R> {
    /// engine stamping loans with the system clock
    pub fn new(repository: R) -> Self {
        Self::with_time(repository, SafeTimeProvider::new(TimeSource::System))
    }

    pub fn with_time(repository: R, time: SafeTimeProvider) -> Self {
        Self {
            repository,
            time,
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
        }
    }

    pub fn with_max_id_attempts(mut self, attempts: u32) -> Self {
        self.max_id_attempts = attempts;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// originate and store a new loan
    ///
    /// `rate` is the flat rate charged once over the whole tenure. A generated
    /// id that is already taken is redrawn, up to `max_id_attempts` times.
    pub fn create_loan(&self, principal: Money, rate: Rate, weeks: u32) -> Result<LoanId> {
        let created_at = self.time.now();

        for attempt in 1..=self.max_id_attempts {
            let mut loan = LoanBuilder::new()
                .id(generate_loan_id()?)
                .principal(principal)
                .rate(rate)
                .weeks(weeks)
                .created_at(created_at)
                .build()?;

            if self.repository.insert_new(&loan)? {
                log_events(&loan.take_events());
                return Ok(loan.id().clone());
            }
            debug!(loan_id = %loan.id(), attempt, "generated loan id already taken");
        }

        Err(BillingError::IdGeneration {
            message: format!("no unused id after {} attempts", self.max_id_attempts),
        })
    }

    pub fn get_outstanding(&self, id: &LoanId) -> Result<Money> {
        Ok(self.repository.find_by_id(id)?.outstanding_amount())
    }

    pub fn get_schedule(&self, id: &LoanId) -> Result<Vec<ScheduleEntry>> {
        Ok(self.repository.find_by_id(id)?.generate_schedule())
    }

    /// pay `amount` against `week`; the amount must equal the weekly installment
    pub fn make_payment(&self, id: &LoanId, week: u32, amount: Money) -> Result<()> {
        let paid_at = self.time.now();

        let result = self.repository.update(id, |loan| {
            loan.apply_payment_at(week, amount, paid_at)?;
            Ok(loan.take_events())
        });

        match result {
            Ok(events) => {
                log_events(&events);
                Ok(())
            }
            Err(e) => {
                warn!(loan_id = %id, week, amount = %amount, error = %e, "payment rejected");
                Err(e)
            }
        }
    }

    /// pay exactly the loan's installment for `week`, returning the amount paid
    pub fn pay_installment(&self, id: &LoanId, week: u32) -> Result<Money> {
        let paid_at = self.time.now();

        let result = self.repository.update(id, |loan| {
            let amount = loan.weekly_installment();
            loan.apply_payment_at(week, amount, paid_at)?;
            Ok((amount, loan.take_events()))
        });

        match result {
            Ok((amount, events)) => {
                log_events(&events);
                Ok(amount)
            }
            Err(e) => {
                warn!(loan_id = %id, week, error = %e, "payment rejected");
                Err(e)
            }
        }
    }

    /// delinquency at `reference_week`; the stored flag is rewritten only when it flips
    pub fn is_delinquent(&self, id: &LoanId, reference_week: u32) -> Result<bool> {
        let (delinquent, events) = self.repository.update(id, |loan| {
            let delinquent = loan.is_delinquent(reference_week);
            Ok((delinquent, loan.take_events()))
        })?;

        log_events(&events);
        Ok(delinquent)
    }

    pub fn loan(&self, id: &LoanId) -> Result<Loan> {
        self.repository.find_by_id(id)
    }

    pub fn loan_ids(&self) -> Result<Vec<LoanId>> {
        self.repository.list_ids()
    }
}

fn log_events(events: &[Event]) {
    for event in events {
        match event {
            Event::LoanCreated {
                loan_id,
                principal,
                loan_amount,
                weekly_installment,
                weeks,
            } => info!(
                %loan_id,
                %principal,
                %loan_amount,
                %weekly_installment,
                weeks,
                "loan created"
            ),
            Event::PaymentReceived {
                loan_id,
                week,
                amount,
                outstanding,
                ..
            } => info!(%loan_id, week, %amount, %outstanding, "payment received"),
            Event::LoanSettled {
                loan_id,
                final_week,
                ..
            } => info!(%loan_id, final_week, "loan settled"),
            Event::DelinquencyChanged {
                loan_id,
                reference_week,
                delinquent,
            } => info!(%loan_id, reference_week, delinquent, "delinquency changed"),
        }
    }
}
