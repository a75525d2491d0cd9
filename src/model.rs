//! Core domain types for the payment ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::Amount;

/// Account identifier, allocated by the store.
pub type AccountId = i64;

/// Payment identifier, allocated by the store.
pub type PaymentId = i64;

/// Wall-clock instant attached to a payment.
pub type Timestamp = DateTime<Utc>;

/// An account and its current balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Amount,
}

/// A committed transfer between two accounts. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub from_id: AccountId,
    pub to_id: AccountId,
    pub amount: Amount,
    pub created_at: Timestamp,
}

impl Payment {
    /// Position of this payment in history order.
    pub fn cursor(&self) -> Cursor {
        Cursor::Before(self.created_at, self.id)
    }

    /// Whether `account` sent or received this payment.
    pub fn involves(&self, account: AccountId) -> bool {
        self.from_id == account || self.to_id == account
    }
}

/// A request to move `amount` from `from` to `to`.
///
/// `idempotency_key` is chosen by the client; resubmitting the same key
/// returns the outcome of the first execution instead of moving money again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    pub idempotency_key: String,
}

impl TransferRequest {
    pub fn new(
        from: AccountId,
        to: AccountId,
        amount: Amount,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            from,
            to,
            amount,
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// A command accepted by [`Ledger::apply`](crate::Ledger::apply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a new account.
    Open,
    /// Move funds between two existing accounts.
    Transfer(TransferRequest),
}

/// Position in an account's history, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Everything created at or before this instant. Rendered as a plain
    /// RFC 3339 timestamp, which is what clients send for "now".
    At(Timestamp),
    /// Everything strictly older than `(created_at, id)`. Rendered as
    /// `<rfc3339>~<id>`; the id breaks ties between payments sharing a
    /// timestamp.
    Before(Timestamp, PaymentId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("invalid cursor timestamp '{0}'")]
    Timestamp(String),
    #[error("invalid cursor payment id '{0}'")]
    PaymentId(String),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::At(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Cursor::Before(ts, id) => write!(
                f,
                "{}~{id}",
                ts.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
        }
    }
}

impl FromStr for Cursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse_ts = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| CursorError::Timestamp(raw.to_string()))
        };
        match s.rsplit_once('~') {
            Some((ts, id)) => {
                let id = id
                    .parse::<PaymentId>()
                    .map_err(|_| CursorError::PaymentId(id.to_string()))?;
                Ok(Cursor::Before(parse_ts(ts)?, id))
            }
            None => Ok(Cursor::At(parse_ts(s)?)),
        }
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One page of an account's payment history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub items: Vec<Payment>,
    /// Cursor for the next page; `None` once history is exhausted.
    pub oldest_timestamp: Option<Cursor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(micros: i64) -> Timestamp {
        Utc.timestamp_micros(micros).unwrap()
    }

    #[test]
    fn cursor_display_round_trips_through_parse() {
        let before = Cursor::Before(ts(1_700_000_000_123_456), 42);
        assert_eq!(before.to_string(), "2023-11-14T22:13:20.123456Z~42");
        assert_eq!(before.to_string().parse::<Cursor>(), Ok(before));

        let at = Cursor::At(ts(1_700_000_000_000_000));
        assert_eq!(at.to_string(), "2023-11-14T22:13:20.000000Z");
        assert_eq!(at.to_string().parse::<Cursor>(), Ok(at));
    }

    #[test]
    fn cursor_accepts_client_iso_timestamps() {
        let cursor: Cursor = "2023-11-14T22:13:20.123Z".parse().unwrap();
        assert_eq!(cursor, Cursor::At(ts(1_700_000_000_123_000)));

        let offset: Cursor = "2023-11-14T23:13:20+01:00".parse().unwrap();
        assert_eq!(offset, Cursor::At(ts(1_700_000_000_000_000)));
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(matches!(
            "yesterday".parse::<Cursor>(),
            Err(CursorError::Timestamp(_))
        ));
        assert!(matches!(
            "2023-11-14T22:13:20Z~abc".parse::<Cursor>(),
            Err(CursorError::PaymentId(_))
        ));
    }

    #[test]
    fn payment_serializes_with_client_field_names() {
        let payment = Payment {
            id: 7,
            from_id: 1,
            to_id: 2,
            amount: Amount::from_minor(30),
            created_at: ts(1_700_000_000_000_000),
        };
        let json = serde_json::to_value(&payment).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["from_id"], 1);
        assert_eq!(json["to_id"], 2);
        assert_eq!(json["amount"], 30);
        assert!(json["created_at"].as_str().unwrap().starts_with("2023-11-14T22:13:20"));
        assert_eq!(payment.cursor(), Cursor::Before(payment.created_at, 7));
        assert!(payment.involves(1) && payment.involves(2) && !payment.involves(3));
    }

    #[test]
    fn history_page_serializes_null_cursor() {
        let page = HistoryPage {
            items: vec![],
            oldest_timestamp: None,
        };
        let json = serde_json::to_value(&page).unwrap();
        assert!(json["items"].as_array().unwrap().is_empty());
        assert!(json["oldest_timestamp"].is_null());
    }

    #[test]
    fn transfer_request_reads_client_body() {
        let request: TransferRequest = serde_json::from_str(
            r#"{"from": 1, "to": 2, "amount": 10, "idempotency_key": "k1"}"#,
        )
        .unwrap();
        assert_eq!(request, TransferRequest::new(1, 2, Amount::from_minor(10), "k1"));
    }
}
