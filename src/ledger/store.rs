//! SQLite-backed ledger store.
//!
//! Only this module and its siblings under `ledger` talk to the database.
//! Every unit of work runs inside one SQLite transaction on a connection
//! opened for that unit; writers use `BEGIN IMMEDIATE`, which takes the
//! database write lock up front, so read-validate-write sequences inside a
//! write unit are serialized against every other writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use tracing::debug;

use super::error::{LedgerError, StoreError};
use crate::config::LedgerConfig;
use crate::model::{Payment, Timestamp};
use crate::Amount;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0)
);

CREATE TABLE IF NOT EXISTS payments (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    from_id    INTEGER NOT NULL REFERENCES accounts(id) ON DELETE RESTRICT,
    to_id      INTEGER NOT NULL REFERENCES accounts(id) ON DELETE RESTRICT,
    amount     INTEGER NOT NULL CHECK (amount > 0),
    created_at INTEGER NOT NULL,
    CHECK (from_id <> to_id)
);

CREATE INDEX IF NOT EXISTS idx_payments_from_created
    ON payments(from_id, created_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_payments_to_created
    ON payments(to_id, created_at DESC, id DESC);

CREATE TABLE IF NOT EXISTS idempotency (
    key        TEXT PRIMARY KEY NOT NULL CHECK (length(key) > 0),
    payment_id INTEGER REFERENCES payments(id),
    failure    TEXT CHECK (failure IN ('insufficient_funds', 'account_not_found')),
    account_id INTEGER,
    balance    INTEGER,
    requested  INTEGER,
    created_at INTEGER NOT NULL,
    CHECK ((payment_id IS NULL) <> (failure IS NULL))
);

CREATE TRIGGER IF NOT EXISTS payments_no_update BEFORE UPDATE ON payments
BEGIN SELECT RAISE(ABORT, 'payments are append-only'); END;
CREATE TRIGGER IF NOT EXISTS payments_no_delete BEFORE DELETE ON payments
BEGIN SELECT RAISE(ABORT, 'payments are append-only'); END;
CREATE TRIGGER IF NOT EXISTS idempotency_no_update BEFORE UPDATE ON idempotency
BEGIN SELECT RAISE(ABORT, 'idempotency records are immutable'); END;
CREATE TRIGGER IF NOT EXISTS idempotency_no_delete BEFORE DELETE ON idempotency
BEGIN SELECT RAISE(ABORT, 'idempotency records are immutable'); END;
"#;

/// Columns selected by [`payment_from_row`], in order.
pub(crate) const PAYMENT_COLUMNS: &str = "id, from_id, to_id, amount, created_at";

/// Handle on the database file. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub(crate) struct Store {
    path: Arc<PathBuf>,
    busy_timeout: Duration,
}

impl Store {
    /// Open (or create) the database and install the schema.
    pub fn open(config: &LedgerConfig) -> Result<Self, StoreError> {
        let store = Self {
            path: Arc::new(config.db_path.clone()),
            busy_timeout: config.busy_timeout(),
        };

        let conn = store.connect()?;
        // WAL is persistent in the file: readers never wait on the writer.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %store.path.display(), "ledger store ready");

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(self.path.as_path())?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    /// Run `f` in a write transaction. Commits only if `f` returns `Ok`;
    /// any error rolls the whole unit back.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        self.unit(TransactionBehavior::Immediate, f)
    }

    /// Run `f` in a read transaction, giving it one consistent snapshot.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        self.unit(TransactionBehavior::Deferred, f)
    }

    fn unit<T>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(behavior)?;
        // dropping `tx` on the error path rolls back
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

pub(crate) fn to_micros(ts: Timestamp) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(idx: usize, micros: i64) -> rusqlite::Result<Timestamp> {
    Utc.timestamp_micros(micros)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

/// Map a row selected with [`PAYMENT_COLUMNS`].
pub(crate) fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        amount: Amount::from_minor(row.get(3)?),
        created_at: from_micros(4, row.get(4)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&LedgerConfig::with_db_path(dir.path().join("ledger.db"))).unwrap();
        (dir, store)
    }

    #[test]
    fn open_is_idempotent() {
        let (dir, store) = open_temp();
        Store::open(&LedgerConfig::with_db_path(store.path())).unwrap();
        assert!(dir.path().join("ledger.db").exists());
    }

    #[test]
    fn write_commits_on_ok() {
        let (_dir, store) = open_temp();
        store
            .write(|tx| {
                tx.execute("INSERT INTO accounts (balance) VALUES (5)", [])?;
                Ok(())
            })
            .unwrap();

        let count: i64 = store
            .read(|tx| Ok(tx.query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn write_rolls_back_on_err() {
        let (_dir, store) = open_temp();
        let result: Result<(), LedgerError> = store.write(|tx| {
            tx.execute("INSERT INTO accounts (balance) VALUES (5)", [])?;
            Err(LedgerError::AccountNotFound(99))
        });
        assert!(matches!(result, Err(LedgerError::AccountNotFound(99))));

        let count: i64 = store
            .read(|tx| Ok(tx.query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn schema_rejects_negative_balance() {
        let (_dir, store) = open_temp();
        let result = store.write(|tx| {
            tx.execute("INSERT INTO accounts (balance) VALUES (-1)", [])?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn payments_are_append_only() {
        let (_dir, store) = open_temp();
        store
            .write(|tx| {
                tx.execute("INSERT INTO accounts (balance) VALUES (0), (0)", [])?;
                tx.execute(
                    "INSERT INTO payments (from_id, to_id, amount, created_at) VALUES (1, 2, 5, ?1)",
                    params![0_i64],
                )?;
                Ok(())
            })
            .unwrap();

        let update = store.write(|tx| {
            tx.execute("UPDATE payments SET amount = 6 WHERE id = 1", [])?;
            Ok(())
        });
        assert!(update.is_err());

        let delete = store.write(|tx| {
            tx.execute("DELETE FROM payments WHERE id = 1", [])?;
            Ok(())
        });
        assert!(delete.is_err());
    }

    #[test]
    fn payments_reject_self_transfer_and_zero_amount() {
        let (_dir, store) = open_temp();
        store
            .write(|tx| {
                tx.execute("INSERT INTO accounts (balance) VALUES (0), (0)", [])?;
                Ok(())
            })
            .unwrap();
        for (from, to, amount) in [(1_i64, 1_i64, 5_i64), (1, 2, 0)] {
            let result = store.write(|tx| {
                tx.execute(
                    "INSERT INTO payments (from_id, to_id, amount, created_at) VALUES (?1, ?2, ?3, 0)",
                    params![from, to, amount],
                )?;
                Ok(())
            });
            assert!(result.is_err(), "{from} -> {to} ({amount})");
        }
    }

    #[test]
    fn micros_round_trip() {
        let ts = Utc.timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(from_micros(0, to_micros(ts)).unwrap(), ts);
    }
}
