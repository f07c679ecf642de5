//! Pure computation engine(s) for the lot ledger, plus the desk lock registry.

pub mod checked;
pub mod locks;
pub mod matching;
pub mod pnl;
pub mod pricing;

pub use locks::{DeskGuard, DeskLocks};
pub use matching::{plan_close, ClosePricing, CloseRequest, Consumption, MatchPlan};
pub use pnl::{ProfitSummary, ProfitSummaryView, TransactionCounts};
pub use pricing::{price_exchange, ExchangeRequest, PricedExchange, Settlement};
