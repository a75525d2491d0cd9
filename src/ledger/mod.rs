//! Payment ledger.
//!
//! The ledger keeps account balances and an append-only payment log in a
//! SQLite database. It opens accounts, moves funds between them exactly once
//! per idempotency key, and serves paginated payment history.
//! Also supports an async stream of commands.
//!
//! Every operation runs its database work on the blocking thread pool inside
//! one store transaction with a connection of its own; nothing in-process is
//! locked while the database is busy. A caller that gives up on a pending
//! operation does not interrupt it: the transaction still commits or rolls
//! back as a whole.

use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::Amount;
use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::model::{Account, AccountId, Command, Cursor, HistoryPage, Payment, TransferRequest};

mod accounts;
mod history;
mod idempotency;
mod store;
mod transfer;

mod error;
pub use error::{ErrorKind, HistoryError, LedgerError, StoreError, TransferError};

use store::Store;
use transfer::Outcome;

/// Handle on a ledger database. Cheap to clone and safe to share between
/// tasks.
#[derive(Clone)]
pub struct Ledger {
    store: Store,
    clock: Arc<dyn Clock>,
    opening_balance: Amount,
    max_history_limit: u32,
}

/// Public API
impl Ledger {
    /// Open (or create) the ledger database described by `config`.
    pub fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let store = Store::open(config)?;
        info!(
            path = %store.path().display(),
            opening_balance = %config.opening_balance,
            "ledger opened"
        );
        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            opening_balance: config.opening_balance,
            max_history_limit: config.max_history_limit.max(1),
        })
    }

    /// Replace the source of payment timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the ledger with the given command stream
    pub async fn run(&self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // any error should not stop the ledger, and each one is already logged
            let _ = self.apply(command).await;
        }
    }

    /// Apply a single command
    pub async fn apply(&self, command: Command) -> Result<(), LedgerError> {
        match command {
            Command::Open => {
                self.create_account().await?;
            }
            Command::Transfer(request) => {
                self.transfer(request).await?;
            }
        }
        Ok(())
    }

    /// Open a new account with the configured opening balance (zero unless
    /// configured otherwise).
    pub async fn create_account(&self) -> Result<Account, LedgerError> {
        let opening_balance = self.opening_balance;
        let result = self
            .blocking(move |store| store.write(|tx| Ok(accounts::insert(tx, opening_balance)?)))
            .await;
        match &result {
            Ok(account) => {
                info!(account = %account.id, balance = %account.balance, "account opened");
            }
            Err(e) => {
                warn!(reason = %e, retryable = e.kind().is_retryable(), "account open failed");
            }
        }
        result
    }

    /// Return the current state of one account
    pub async fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.blocking(move |store| store.read(|tx| Ok(accounts::find(tx, id)?)))
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Return every account, ordered by id.
    pub async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.blocking(|store| store.read(|tx| Ok(accounts::list(tx)?)))
            .await
    }

    /// Move `request.amount` from `request.from` to `request.to`.
    ///
    /// Returns the created payment, or, if `request.idempotency_key` was used
    /// before, the outcome of that first call (payment or failure) without
    /// executing anything. A [`ErrorKind::Transient`] failure means nothing
    /// was applied and the same request may be retried.
    pub async fn transfer(&self, request: TransferRequest) -> Result<Payment, LedgerError> {
        let result = if request.idempotency_key.is_empty() {
            // nothing to look up or record under
            Err(TransferError::EmptyIdempotencyKey.into())
        } else {
            let clock = Arc::clone(&self.clock);
            let unit = request.clone();
            self.blocking(move |store| {
                store.write(|tx| transfer::execute(tx, &unit, || clock.now()))
            })
            .await
        };
        Self::log_result(&request, &result);

        match result? {
            Outcome::Applied(payment) => Ok(payment),
            Outcome::Replayed(original) => Ok(original?),
            Outcome::Rejected(err) => Err(err.into()),
        }
    }

    /// Return up to `limit` of `account`'s payments, newest first, older than
    /// `cursor`.
    ///
    /// Pass the returned `oldest_timestamp` as the next `cursor` to continue;
    /// it is `None` once history is exhausted. Limits above the configured
    /// maximum are clamped to it.
    pub async fn history(
        &self,
        account: AccountId,
        limit: i64,
        cursor: Option<Cursor>,
    ) -> Result<HistoryPage, LedgerError> {
        if limit <= 0 {
            return Err(HistoryError::InvalidLimit(limit).into());
        }
        let limit = u32::try_from(limit)
            .unwrap_or(u32::MAX)
            .min(self.max_history_limit);

        let page = self
            .blocking(move |store| store.read(|tx| history::page(tx, account, limit, cursor)))
            .await?;
        debug!(
            account = %account,
            limit,
            returned = page.items.len(),
            more = page.oldest_timestamp.is_some(),
            "history page served"
        );
        Ok(page)
    }
}

/// Private API
impl Ledger {
    /// Run `f` against the store on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Store) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Internal(format!("store task failed: {e}")))?
    }

    /// Small helper to log transfer results
    fn log_result(request: &TransferRequest, result: &Result<Outcome, LedgerError>) {
        let TransferRequest {
            from,
            to,
            amount,
            idempotency_key: key,
        } = request;
        match result {
            Ok(Outcome::Applied(payment)) => {
                info!(
                    from = %from,
                    to = %to,
                    amount = %amount,
                    key = %key,
                    payment = %payment.id,
                    "transfer applied"
                );
            }
            Ok(Outcome::Replayed(original)) => {
                debug!(
                    from = %from,
                    to = %to,
                    amount = %amount,
                    key = %key,
                    original_ok = original.is_ok(),
                    "transfer replayed from idempotency record"
                );
            }
            Ok(Outcome::Rejected(reason)) => {
                info!(
                    from = %from,
                    to = %to,
                    amount = %amount,
                    key = %key,
                    reason = %reason,
                    "transfer rejected"
                );
            }
            Err(e) if e.kind().is_retryable() => {
                warn!(
                    from = %from,
                    to = %to,
                    amount = %amount,
                    key = %key,
                    reason = %e,
                    "transfer aborted, store unavailable"
                );
            }
            Err(e) => {
                info!(
                    from = %from,
                    to = %to,
                    amount = %amount,
                    key = %key,
                    reason = %e,
                    "transfer skipped"
                );
            }
        }
    }
}
