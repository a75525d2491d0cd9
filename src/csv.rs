use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::amount::AmountError;
use crate::{Account, AccountId, Amount, Command, Payment, TransferRequest};

/// Errors that can occur when reading or writing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: u64, source: csv::Error },

    #[error("line {line}: unrecognized command type '{command}'")]
    UnrecognizedType { line: u64, command: String },

    #[error("line {line}: {command} missing {field}")]
    MissingField {
        line: u64,
        command: String,
        field: &'static str,
    },

    #[error("line {line}: {source}")]
    Amount { line: u64, source: AmountError },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    from: Option<AccountId>,
    to: Option<AccountId>,
    amount: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Serialize)]
struct AccountRow {
    id: AccountId,
    balance: String,
}

#[derive(Debug, Serialize)]
struct PaymentRow {
    id: i64,
    from_id: AccountId,
    to_id: AccountId,
    amount: String,
    created_at: String,
}

/// Read ledger commands from a csv file with header `type,from,to,amount,key`.
///
/// Amounts are decimal strings with at most `scale` decimal places.
/// The file is opened before returning; the iterator does not borrow `path`.
pub fn read_commands(
    path: &Path,
    scale: u32,
) -> Result<impl Iterator<Item = Result<Command, CsvError>> + use<>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(move |(idx, result)| {
            let line = idx as u64 + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(row, line, scale)
        }))
}

fn parse_row(row: InputRow, line: u64, scale: u32) -> Result<Command, CsvError> {
    let missing = |field| CsvError::MissingField {
        line,
        command: row.r#type.clone(),
        field,
    };
    match row.r#type.as_str() {
        "open" => Ok(Command::Open),
        "transfer" => {
            let from = row.from.ok_or_else(|| missing("from"))?;
            let to = row.to.ok_or_else(|| missing("to"))?;
            let amount = row
                .amount
                .as_deref()
                .filter(|a| !a.is_empty())
                .ok_or_else(|| missing("amount"))?;
            let amount = Amount::parse_scaled(amount, scale)
                .map_err(|source| CsvError::Amount { line, source })?;
            let key = row
                .key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| missing("key"))?;
            Ok(Command::Transfer(TransferRequest::new(from, to, amount, key)))
        }
        other => Err(CsvError::UnrecognizedType {
            line,
            command: other.to_string(),
        }),
    }
}

/// Write accounts as `id,balance` csv.
pub fn write_accounts<'a>(
    out: impl io::Write,
    accounts: impl IntoIterator<Item = &'a Account>,
    scale: u32,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for account in accounts {
        writer.serialize(AccountRow {
            id: account.id,
            balance: account.balance.scaled(scale).to_string(),
        })?;
    }

    writer.flush()?;
    Ok(())
}

/// Write payments as `id,from_id,to_id,amount,created_at` csv.
pub fn write_payments<'a>(
    out: impl io::Write,
    payments: impl IntoIterator<Item = &'a Payment>,
    scale: u32,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for payment in payments {
        writer.serialize(PaymentRow {
            id: payment.id,
            from_id: payment.from_id,
            to_id: payment.to_id,
            amount: payment.amount.scaled(scale).to_string(),
            created_at: payment.created_at.to_rfc3339(),
        })?;
    }

    writer.flush()?;
    Ok(())
}
