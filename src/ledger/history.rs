//! Reverse-chronological payment history with keyset pagination.
//!
//! Rows are ordered by `(created_at DESC, id DESC)`. A page ends at the last
//! row it returned, and the next page starts strictly after that
//! `(created_at, id)` pair, so payments sharing a timestamp are neither
//! skipped nor repeated across page boundaries.

use rusqlite::{Connection, params};

use super::accounts;
use super::error::{HistoryError, LedgerError};
use super::store::{PAYMENT_COLUMNS, payment_from_row, to_micros};
use crate::model::{AccountId, Cursor, HistoryPage, PaymentId};

/// Load one page of `account`'s history. `limit` has already been checked
/// to be positive and clamped by the caller.
pub(crate) fn page(
    conn: &Connection,
    account: AccountId,
    limit: u32,
    cursor: Option<Cursor>,
) -> Result<HistoryPage, LedgerError> {
    if accounts::find(conn, account)?.is_none() {
        return Err(HistoryError::AccountNotFound(account).into());
    }

    let (before_ts, before_id) = bound(cursor);
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments
         WHERE (from_id = ?1 OR to_id = ?1)
           AND (created_at < ?2 OR (created_at = ?2 AND id < ?3))
         ORDER BY created_at DESC, id DESC
         LIMIT ?4"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let items = stmt
        .query_map(params![account, before_ts, before_id, limit], payment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let oldest_timestamp = if items.len() == limit as usize {
        items.last().map(|p| p.cursor())
    } else {
        None
    };

    Ok(HistoryPage {
        items,
        oldest_timestamp,
    })
}

/// Exclusive upper bound `(created_at, id)` for a cursor. `At(ts)` keeps
/// every id at `ts`, which makes it an inclusive timestamp bound.
fn bound(cursor: Option<Cursor>) -> (i64, PaymentId) {
    match cursor {
        None => (i64::MAX, PaymentId::MAX),
        Some(Cursor::At(ts)) => (to_micros(ts), PaymentId::MAX),
        Some(Cursor::Before(ts, id)) => (to_micros(ts), id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::store::Store;
    use crate::model::{Payment, Timestamp};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    /// Accounts 1, 2, 3 and the given `(from, to, second)` payments inserted
    /// in order, amount 1 each.
    fn seeded(payments: &[(i64, i64, i64)]) -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&LedgerConfig::with_db_path(dir.path().join("ledger.db"))).unwrap();
        store
            .write(|tx| {
                tx.execute("INSERT INTO accounts (balance) VALUES (0), (0), (0)", [])?;
                for (from, to, secs) in payments {
                    tx.execute(
                        "INSERT INTO payments (from_id, to_id, amount, created_at)
                         VALUES (?1, ?2, 1, ?3)",
                        params![from, to, to_micros(ts(*secs))],
                    )?;
                }
                Ok(())
            })
            .unwrap();
        (dir, store)
    }

    fn load(store: &Store, account: AccountId, limit: u32, cursor: Option<Cursor>) -> HistoryPage {
        store.read(|tx| page(tx, account, limit, cursor)).unwrap()
    }

    fn ids(items: &[Payment]) -> Vec<PaymentId> {
        items.iter().map(|p| p.id).collect()
    }

    #[test]
    fn newest_first_for_sender_and_receiver() {
        let (_dir, store) = seeded(&[(1, 2, 0), (2, 1, 1), (2, 3, 2), (3, 1, 3)]);
        let page = load(&store, 1, 10, None);
        assert_eq!(ids(&page.items), vec![4, 2, 1]);
        assert!(page.items.iter().all(|p| p.involves(1)));
        assert_eq!(page.oldest_timestamp, None);
    }

    #[test]
    fn full_page_returns_cursor_of_last_row() {
        let (_dir, store) = seeded(&[(1, 2, 0), (1, 2, 1), (1, 2, 2)]);
        let page = load(&store, 1, 2, None);
        assert_eq!(ids(&page.items), vec![3, 2]);
        assert_eq!(page.oldest_timestamp, Some(Cursor::Before(ts(1), 2)));

        let next = load(&store, 1, 2, page.oldest_timestamp);
        assert_eq!(ids(&next.items), vec![1]);
        assert_eq!(next.oldest_timestamp, None);
    }

    #[test]
    fn at_cursor_is_inclusive() {
        let (_dir, store) = seeded(&[(1, 2, 0), (1, 2, 5), (1, 2, 5), (1, 2, 9)]);
        let page = load(&store, 1, 10, Some(Cursor::At(ts(5))));
        assert_eq!(ids(&page.items), vec![3, 2, 1]);
    }

    #[test]
    fn ties_split_across_pages_without_loss() {
        // five payments in the same microsecond
        let (_dir, store) = seeded(&[(1, 2, 7); 5]);
        let first = load(&store, 1, 2, Some(Cursor::At(ts(7))));
        assert_eq!(ids(&first.items), vec![5, 4]);
        let second = load(&store, 1, 2, first.oldest_timestamp);
        assert_eq!(ids(&second.items), vec![3, 2]);
        let third = load(&store, 1, 2, second.oldest_timestamp);
        assert_eq!(ids(&third.items), vec![1]);
        assert_eq!(third.oldest_timestamp, None);
    }

    #[test]
    fn exact_multiple_ends_with_empty_page() {
        let (_dir, store) = seeded(&[(1, 2, 0), (1, 2, 1)]);
        let first = load(&store, 1, 2, None);
        assert!(first.oldest_timestamp.is_some());
        let last = load(&store, 1, 2, first.oldest_timestamp);
        assert!(last.items.is_empty());
        assert_eq!(last.oldest_timestamp, None);
    }

    #[test]
    fn account_without_payments_has_empty_history() {
        let (_dir, store) = seeded(&[(1, 2, 0)]);
        let page = load(&store, 3, 5, None);
        assert!(page.items.is_empty());
        assert_eq!(page.oldest_timestamp, None);
    }

    #[test]
    fn missing_account_fails() {
        let (_dir, store) = seeded(&[]);
        let result = store.read(|tx| page(tx, 42, 5, None));
        assert!(matches!(
            result,
            Err(LedgerError::History(HistoryError::AccountNotFound(42)))
        ));
    }
}
