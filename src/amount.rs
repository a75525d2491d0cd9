use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Money amount in integer minor units (no fractional units are stored).
///
/// How many decimal places a minor unit represents is a presentation policy
/// (see [`LedgerConfig::amount_scale`](crate::config::LedgerConfig)); the
/// ledger itself only ever adds and subtracts integers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

/// Errors from parsing a decimal amount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount '{0}'")]
    Invalid(String),
    #[error("amount '{value}' has more than {scale} decimal places")]
    TooPrecise { value: String, scale: u32 },
    #[error("amount '{0}' is out of range")]
    OutOfRange(String),
    #[error("unsupported amount scale {0}")]
    UnsupportedScale(u32),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Largest supported number of decimal places.
    pub const MAX_SCALE: u32 = 9;

    pub const fn from_minor(value: i64) -> Self {
        Amount(value)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Parse a decimal string such as `"12.5"` into minor units, with `scale`
    /// decimal places per major unit.
    pub fn parse_scaled(input: &str, scale: u32) -> Result<Self, AmountError> {
        let factor = scale_factor(scale)?;
        let value = input.trim();
        if value.is_empty() {
            return Err(AmountError::Empty);
        }

        let (negative, digits) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value.strip_prefix('+').unwrap_or(value)),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !is_digits(whole) || !is_digits(frac) {
            return Err(AmountError::Invalid(value.to_string()));
        }
        if frac.len() > scale as usize {
            return Err(AmountError::TooPrecise {
                value: value.to_string(),
                scale,
            });
        }

        let out_of_range = || AmountError::OutOfRange(value.to_string());
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| out_of_range())?
        };
        // right-pad the fraction to `scale` digits
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = scale as usize);
            padded.parse().map_err(|_| out_of_range())?
        };

        let minor = whole
            .checked_mul(factor)
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(out_of_range)?;

        Ok(Amount(if negative { -minor } else { minor }))
    }

    /// Render with `scale` decimal places.
    pub fn scaled(self, scale: u32) -> Scaled {
        Scaled {
            amount: self,
            scale: scale.min(Self::MAX_SCALE),
        }
    }
}

fn scale_factor(scale: u32) -> Result<i64, AmountError> {
    if scale > Amount::MAX_SCALE {
        return Err(AmountError::UnsupportedScale(scale));
    }
    Ok(10_i64.pow(scale))
}

/// Display adapter returned by [`Amount::scaled`].
#[derive(Debug, Clone, Copy)]
pub struct Scaled {
    amount: Amount,
    scale: u32,
}

impl fmt::Display for Scaled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.amount.0);
        }
        let factor = 10_u64.pow(self.scale);
        let sign = if self.amount.0 < 0 { "-" } else { "" };
        let abs = self.amount.0.unsigned_abs();
        let whole = abs / factor;
        let frac = abs % factor;
        write!(f, "{sign}{whole}.{frac:0width$}", width = self.scale as usize)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
