//! Idempotency index: durable map from a client key to the outcome of the
//! first transfer executed under it.
//!
//! Lookups and inserts happen only inside the transfer's write unit, so a
//! committed transfer and its record become visible together. Records are
//! never updated or deleted (the schema enforces this with triggers).

use rusqlite::{Connection, OptionalExtension, params};

use super::error::{StoreError, TransferError};
use super::store::{PAYMENT_COLUMNS, payment_from_row, to_micros};
use crate::Amount;
use crate::model::{Payment, PaymentId, Timestamp};

const INSUFFICIENT_FUNDS: &str = "insufficient_funds";
const ACCOUNT_NOT_FOUND: &str = "account_not_found";

/// What the first execution under a key produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    Payment(Payment),
    Failure(TransferError),
}

impl Recorded {
    pub fn into_result(self) -> Result<Payment, TransferError> {
        match self {
            Recorded::Payment(payment) => Ok(payment),
            Recorded::Failure(err) => Err(err),
        }
    }
}

struct RecordRow {
    payment_id: Option<PaymentId>,
    failure: Option<String>,
    account_id: Option<i64>,
    balance: Option<i64>,
    requested: Option<i64>,
}

pub(crate) fn lookup(conn: &Connection, key: &str) -> Result<Option<Recorded>, StoreError> {
    let row = conn
        .query_row(
            "SELECT payment_id, failure, account_id, balance, requested
             FROM idempotency WHERE key = ?1",
            params![key],
            |row| {
                Ok(RecordRow {
                    payment_id: row.get(0)?,
                    failure: row.get(1)?,
                    account_id: row.get(2)?,
                    balance: row.get(3)?,
                    requested: row.get(4)?,
                })
            },
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    if let Some(payment_id) = row.payment_id {
        let payment = conn.query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
            params![payment_id],
            payment_from_row,
        )?;
        return Ok(Some(Recorded::Payment(payment)));
    }

    let corrupt = || StoreError::Internal(format!("malformed idempotency record for key '{key}'"));
    let account = row.account_id.ok_or_else(corrupt)?;
    let failure = match row.failure.as_deref() {
        Some(INSUFFICIENT_FUNDS) => TransferError::InsufficientFunds {
            account,
            balance: Amount::from_minor(row.balance.ok_or_else(corrupt)?),
            requested: Amount::from_minor(row.requested.ok_or_else(corrupt)?),
        },
        Some(ACCOUNT_NOT_FOUND) => TransferError::AccountNotFound(account),
        _ => return Err(corrupt()),
    };
    Ok(Some(Recorded::Failure(failure)))
}

pub(crate) fn record_payment(
    conn: &Connection,
    key: &str,
    payment_id: PaymentId,
    now: Timestamp,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO idempotency (key, payment_id, created_at) VALUES (?1, ?2, ?3)",
        params![key, payment_id, to_micros(now)],
    )?;
    Ok(())
}

/// Only state-dependent failures (missing account, insufficient funds) are
/// recorded; argument errors are refused.
pub(crate) fn record_failure(
    conn: &Connection,
    key: &str,
    failure: &TransferError,
    now: Timestamp,
) -> Result<(), StoreError> {
    let (code, account, balance, requested) = match failure {
        TransferError::InsufficientFunds {
            account,
            balance,
            requested,
        } => (
            INSUFFICIENT_FUNDS,
            *account,
            Some(balance.minor()),
            Some(requested.minor()),
        ),
        TransferError::AccountNotFound(account) => (ACCOUNT_NOT_FOUND, *account, None, None),
        other => {
            return Err(StoreError::Internal(format!(
                "refusing to record non-terminal failure: {other}"
            )));
        }
    };
    conn.execute(
        "INSERT INTO idempotency (key, failure, account_id, balance, requested, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![key, code, account, balance, requested, to_micros(now)],
    )?;
    Ok(())
}
