//! Domain types for the desk ledger.
//!
//! - Lossless numeric handling via the Decimal wrapper and its rounding policy
//! - Primitives: TimeMs, CashDeskId, Asset
//! - Fiat lots, PnL matches, transactions and cash desks
//! - Undo entries

pub mod cash_desk;
pub mod decimal;
pub mod lot;
pub mod pnl_match;
pub mod primitives;
pub mod reversal;
pub mod transaction;

pub use cash_desk::{CashDesk, DeskScope};
pub use decimal::Decimal;
pub use lot::{fifo_cmp, FiatLot, InheritedCost, LotSource, NewLot, Stage};
pub use pnl_match::PnlMatch;
pub use primitives::{Asset, CashDeskId, TimeMs};
pub use reversal::{InverseAction, ReversalEntry};
pub use transaction::{Transaction, TransactionColumns, TransactionKind, TransactionType};
