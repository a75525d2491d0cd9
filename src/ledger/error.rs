//! Error types for ledger operations.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::Amount;
use crate::model::AccountId;

/// Coarse classification of a [`LedgerError`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An account (or other resource) does not exist.
    NotFound,
    /// The request itself is malformed.
    Validation,
    /// The request conflicts with current state (insufficient funds).
    Conflict,
    /// The store is busy or unreachable; retrying with the same idempotency
    /// key is safe.
    Transient,
    /// Unexpected store failure.
    Internal,
}

impl ErrorKind {
    /// HTTP status an API layer should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 422,
            ErrorKind::Transient => 503,
            ErrorKind::Internal => 500,
        }
    }

    pub fn is_retryable(self) -> bool {
        self == ErrorKind::Transient
    }
}

/// Top-level error returned by [`Ledger`](super::Ledger) operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("history failed: {0}")]
    History(#[from] HistoryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AccountNotFound(_) => ErrorKind::NotFound,
            LedgerError::Transfer(e) => e.kind(),
            LedgerError::History(e) => e.kind(),
            LedgerError::Store(e) => e.kind(),
        }
    }

    /// Short machine-readable code, suitable for an `{"error": ...}` body.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) => "account_not_found",
            LedgerError::Transfer(e) => match e {
                TransferError::AccountNotFound(_) => "account_not_found",
                TransferError::SameAccount(_) => "same_account",
                TransferError::InvalidAmount(_) => "invalid_amount",
                TransferError::EmptyIdempotencyKey => "missing_idempotency_key",
                TransferError::InsufficientFunds { .. } => "insufficient_funds",
            },
            LedgerError::History(e) => match e {
                HistoryError::AccountNotFound(_) => "account_not_found",
                HistoryError::InvalidLimit(_) => "invalid_limit",
            },
            LedgerError::Store(StoreError::Unavailable(_)) => "store_unavailable",
            LedgerError::Store(StoreError::Internal(_)) => "internal",
        }
    }
}

/// Error during transfer execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("cannot transfer from account {0} to itself")]
    SameAccount(AccountId),
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Amount),
    #[error("idempotency key must not be empty")]
    EmptyIdempotencyKey,
    #[error("insufficient funds in account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: Amount,
        requested: Amount,
    },
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::AccountNotFound(_) => ErrorKind::NotFound,
            TransferError::SameAccount(_)
            | TransferError::InvalidAmount(_)
            | TransferError::EmptyIdempotencyKey => ErrorKind::Validation,
            TransferError::InsufficientFunds { .. } => ErrorKind::Conflict,
        }
    }
}

/// Error during history retrieval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("limit must be positive, got {0}")]
    InvalidLimit(i64),
}

impl HistoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HistoryError::AccountNotFound(_) => ErrorKind::NotFound,
            HistoryError::InvalidLimit(_) => ErrorKind::Validation,
        }
    }
}

/// Failure of the underlying store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[source] rusqlite::Error),
    #[error("store failure: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::Transient,
            StoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let transient = matches!(
            &err,
            rusqlite::Error::SqliteFailure(e, _) if matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            )
        );
        if transient {
            StoreError::Unavailable(err)
        } else {
            StoreError::Internal(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Store(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn busy_and_locked_are_transient() {
        for code in [rusqlite::ffi::SQLITE_BUSY, rusqlite::ffi::SQLITE_LOCKED] {
            let err = LedgerError::from(sqlite_failure(code));
            assert_eq!(err.kind(), ErrorKind::Transient);
            assert!(err.kind().is_retryable());
            assert_eq!(err.code(), "store_unavailable");
        }
    }

    #[test]
    fn other_store_failures_are_internal() {
        let err = LedgerError::from(sqlite_failure(rusqlite::ffi::SQLITE_CORRUPT));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.kind().is_retryable());

        let err = LedgerError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn transfer_errors_classify() {
        let cases = [
            (TransferError::AccountNotFound(1), ErrorKind::NotFound, 404),
            (TransferError::SameAccount(1), ErrorKind::Validation, 400),
            (
                TransferError::InvalidAmount(Amount::ZERO),
                ErrorKind::Validation,
                400,
            ),
            (TransferError::EmptyIdempotencyKey, ErrorKind::Validation, 400),
            (
                TransferError::InsufficientFunds {
                    account: 1,
                    balance: Amount::ZERO,
                    requested: Amount::from_minor(10),
                },
                ErrorKind::Conflict,
                422,
            ),
        ];
        for (err, kind, status) in cases {
            let err = LedgerError::from(err);
            assert_eq!(err.kind(), kind, "{err}");
            assert_eq!(err.kind().http_status(), status);
        }
    }


    #[test]
    fn messages_are_human_readable() {
        let err = LedgerError::from(TransferError::InsufficientFunds {
            account: 4,
            balance: Amount::from_minor(5),
            requested: Amount::from_minor(10),
        });
        assert_eq!(
            err.to_string(),
            "transfer failed: insufficient funds in account 4: balance 5, requested 10"
        );
        assert_eq!(err.code(), "insufficient_funds");

        let err = LedgerError::from(HistoryError::InvalidLimit(0));
        assert_eq!(err.to_string(), "history failed: limit must be positive, got 0");
        assert_eq!(err.code(), "invalid_limit");
    }
}
