pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Asset, CashDesk, CashDeskId, Decimal, FiatLot, PnlMatch, TimeMs, Transaction, TransactionKind,
    TransactionType,
};
pub use engine::{ExchangeRequest, ProfitSummary};
pub use error::{AppError, LedgerError};
pub use orchestration::{CashMovement, CashRequest, Ledger};
