//! Transfer execution.
//!
//! [`execute`] is the body of one write unit: idempotency lookup, argument
//! validation, balance check, debit, credit, payment append and idempotency
//! record, in that order. The caller commits when it returns `Ok`.

use chrono::SubsecRound;
use rusqlite::{Transaction, params};

use super::error::{LedgerError, StoreError, TransferError};
use super::idempotency;
use super::{accounts, store::to_micros};
use crate::model::{Payment, Timestamp, TransferRequest};

/// Result of one transfer unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Money moved; the payment is new.
    Applied(Payment),
    /// A state-dependent failure, now recorded under the key.
    Rejected(TransferError),
    /// The key was already used; this is the original outcome.
    Replayed(Result<Payment, TransferError>),
}

/// Checks that need no store access.
pub(crate) fn validate(request: &TransferRequest) -> Result<(), TransferError> {
    if request.idempotency_key.is_empty() {
        return Err(TransferError::EmptyIdempotencyKey);
    }
    if request.from == request.to {
        return Err(TransferError::SameAccount(request.from));
    }
    if !request.amount.is_positive() {
        return Err(TransferError::InvalidAmount(request.amount));
    }
    Ok(())
}

/// Execute `request` inside the write unit `tx`. `now` is read once, after
/// the write lock is held, and truncated to the microseconds the store keeps.
pub(crate) fn execute(
    tx: &Transaction<'_>,
    request: &TransferRequest,
    now: impl FnOnce() -> Timestamp,
) -> Result<Outcome, LedgerError> {
    let key = request.idempotency_key.as_str();

    // A used key answers with its first outcome, whatever the new arguments.
    if let Some(recorded) = idempotency::lookup(tx, key)? {
        return Ok(Outcome::Replayed(recorded.into_result()));
    }

    validate(request)?;

    let now = now().trunc_subsecs(6);
    let reject = |failure: TransferError| -> Result<Outcome, LedgerError> {
        idempotency::record_failure(tx, key, &failure, now)?;
        Ok(Outcome::Rejected(failure))
    };

    let Some(from) = accounts::find(tx, request.from)? else {
        return reject(TransferError::AccountNotFound(request.from));
    };
    let Some(to) = accounts::find(tx, request.to)? else {
        return reject(TransferError::AccountNotFound(request.to));
    };

    if from.balance < request.amount {
        return reject(TransferError::InsufficientFunds {
            account: from.id,
            balance: from.balance,
            requested: request.amount,
        });
    }

    let debited = from.balance.checked_sub(request.amount).ok_or_else(|| {
        StoreError::Internal(format!("balance underflow on account {}", from.id))
    })?;
    let credited = to.balance.checked_add(request.amount).ok_or_else(|| {
        StoreError::Internal(format!("balance overflow on account {}", to.id))
    })?;
    accounts::set_balance(tx, from.id, debited)?;
    accounts::set_balance(tx, to.id, credited)?;

    tx.execute(
        "INSERT INTO payments (from_id, to_id, amount, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![from.id, to.id, request.amount.minor(), to_micros(now)],
    )?;
    let payment = Payment {
        id: tx.last_insert_rowid(),
        from_id: from.id,
        to_id: to.id,
        amount: request.amount,
        created_at: now,
    };

    idempotency::record_payment(tx, key, payment.id, now)?;

    Ok(Outcome::Applied(payment))
}
