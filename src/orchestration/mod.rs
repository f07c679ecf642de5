//! Write-path orchestration: the ledger service and undo replay.

pub mod ledger;
pub mod reversal;

pub use ledger::{CashMovement, CashRequest, Ledger};
