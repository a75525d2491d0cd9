//! Ledger configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Amount;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}'")]
    Parse { var: &'static str, value: String },
    #[error("{var}: {reason}")]
    OutOfRange { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,
    /// How long a store call waits on the database write lock before
    /// failing as unavailable
    pub busy_timeout_ms: u64,
    /// Upper bound on the page size of a history query
    pub max_history_limit: u32,
    /// Balance given to newly created accounts, in minor units
    pub opening_balance: Amount,
    /// Decimal places per major unit when amounts are parsed or printed
    pub amount_scale: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("ledger.db"),
            busy_timeout_ms: 5_000,
            max_history_limit: 100,
            opening_balance: Amount::ZERO,
            amount_scale: 0,
        }
    }
}

impl LedgerConfig {
    /// Configuration for a database at `path`, everything else default.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            ..Self::default()
        }
    }

    /// Read overrides from `LEDGER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("LEDGER_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_var(&lookup, "LEDGER_BUSY_TIMEOUT_MS")? {
            config.busy_timeout_ms = ms;
        }
        if let Some(limit) = parse_var(&lookup, "LEDGER_MAX_HISTORY_LIMIT")? {
            config.max_history_limit = limit;
        }
        if let Some(balance) = parse_var::<i64>(&lookup, "LEDGER_OPENING_BALANCE")? {
            config.opening_balance = Amount::from_minor(balance);
        }
        if let Some(scale) = parse_var(&lookup, "LEDGER_AMOUNT_SCALE")? {
            config.amount_scale = scale;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_history_limit == 0 {
            return Err(ConfigError::OutOfRange {
                var: "LEDGER_MAX_HISTORY_LIMIT",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.opening_balance < Amount::ZERO {
            return Err(ConfigError::OutOfRange {
                var: "LEDGER_OPENING_BALANCE",
                reason: format!("{} is negative", self.opening_balance),
            });
        }
        if self.amount_scale > Amount::MAX_SCALE {
            return Err(ConfigError::OutOfRange {
                var: "LEDGER_AMOUNT_SCALE",
                reason: format!("{} exceeds {}", self.amount_scale, Amount::MAX_SCALE),
            });
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { var, value }),
    }
}
