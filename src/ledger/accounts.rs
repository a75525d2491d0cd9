//! Account rows: creation, lookup and balance updates.

use rusqlite::{Connection, OptionalExtension, params};

use super::error::StoreError;
use crate::Amount;
use crate::model::{Account, AccountId};

pub(crate) fn insert(conn: &Connection, opening_balance: Amount) -> Result<Account, StoreError> {
    conn.execute(
        "INSERT INTO accounts (balance) VALUES (?1)",
        params![opening_balance.minor()],
    )?;
    Ok(Account {
        id: conn.last_insert_rowid(),
        balance: opening_balance,
    })
}

pub(crate) fn find(conn: &Connection, id: AccountId) -> Result<Option<Account>, StoreError> {
    let balance = conn
        .query_row(
            "SELECT balance FROM accounts WHERE id = ?1",
            params![id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(balance.map(|balance| Account {
        id,
        balance: Amount::from_minor(balance),
    }))
}

pub(crate) fn list(conn: &Connection) -> Result<Vec<Account>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, balance FROM accounts ORDER BY id ASC")?;
    let accounts = stmt
        .query_map([], |row| {
            Ok(Account {
                id: row.get(0)?,
                balance: Amount::from_minor(row.get(1)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(accounts)
}

/// Overwrite a balance inside the caller's write unit.
pub(crate) fn set_balance(
    conn: &Connection,
    id: AccountId,
    balance: Amount,
) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE accounts SET balance = ?1 WHERE id = ?2",
        params![balance.minor(), id],
    )?;
    if updated != 1 {
        return Err(StoreError::Internal(format!(
            "balance update touched {updated} rows for account {id}"
        )));
    }
    Ok(())
}
