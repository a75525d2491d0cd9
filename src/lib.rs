pub mod amount;
pub mod clock;
pub mod config;
pub mod csv;
pub mod ledger;
pub mod model;

pub use amount::Amount;
pub use config::LedgerConfig;
pub use ledger::{ErrorKind, Ledger, LedgerError};
pub use model::{Account, AccountId, Command, Cursor, HistoryPage, Payment, PaymentId, TransferRequest};
