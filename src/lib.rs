pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod factory;
pub mod loan;
pub mod menu;
pub mod repository;
pub mod types;

// re-export key types
pub use config::BillingConfig;
pub use decimal::{Money, Rate};
pub use engine::BillingEngine;
pub use errors::{BillingError, ErrorKind, Result};
pub use events::{Event, EventStore};
pub use factory::{create_loan, generate_loan_id, LoanBuilder};
pub use loan::Loan;
pub use repository::{JsonLoanRepository, LoanRepository, LoanSnapshot, MemoryLoanRepository};
pub use types::{LoanId, LoanStatus, ScheduleEntry, WeekStatus};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
