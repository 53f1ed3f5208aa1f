use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::DEFAULT_MAX_ID_ATTEMPTS;
use crate::errors::{BillingError, Result};

/// ledger file used when nothing else is configured
pub const DEFAULT_LEDGER_PATH: &str = "transactions.json";

/// runtime configuration for the billing binary
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// json ledger holding every loan
    pub ledger_path: PathBuf,
    /// tracing filter directive, e.g. `info` or `loan_billing_rs=debug`
    pub log_level: String,
    /// attempts at drawing an unused loan id
    pub max_id_attempts: u32,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            log_level: "info".to_string(),
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
        }
    }
}

impl BillingConfig {
    /// load from `BILLING_*` environment variables, defaults for anything unset
    pub fn from_env() -> std::result::Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("BILLING").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger_path.as_os_str().is_empty() {
            return Err(BillingError::InvalidConfiguration {
                message: "ledger path cannot be empty".to_string(),
            });
        }

        if self.max_id_attempts == 0 {
            return Err(BillingError::InvalidConfiguration {
                message: "max_id_attempts must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();

        assert_eq!(config.ledger_path, PathBuf::from("transactions.json"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_id_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = BillingConfig::default()
            .with_ledger_path("/var/lib/billing/loans.json")
            .with_log_level("debug");

        assert_eq!(config.ledger_path, PathBuf::from("/var/lib/billing/loans.json"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_validate() {
        let config = BillingConfig {
            max_id_attempts: 0,
            ..BillingConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidConfiguration);

        let config = BillingConfig::default().with_ledger_path("");
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("BILLING_MAX_ID_ATTEMPTS", "9");
        std::env::set_var("BILLING_LEDGER_PATH", "ledger/loans.json");

        let config = BillingConfig::from_env().unwrap();

        std::env::remove_var("BILLING_MAX_ID_ATTEMPTS");
        std::env::remove_var("BILLING_LEDGER_PATH");

        assert_eq!(config.max_id_attempts, 9);
        assert_eq!(config.ledger_path, PathBuf::from("ledger/loans.json"));
        assert_eq!(config.log_level, "info");
    }
}
