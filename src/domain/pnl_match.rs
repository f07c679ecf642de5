//! Realized PnL match records.

use crate::domain::{Asset, CashDeskId, Decimal, Stage, TimeMs};
use serde::{Deserialize, Serialize};

/// One lot (partially or fully) consumed by one closing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnlMatch {
    pub id: i64,
    pub cash_desk_id: CashDeskId,
    pub currency: Asset,
    pub open_lot_id: i64,
    pub close_tx_id: i64,
    #[serde(with = "crate::domain::decimal::text")]
    pub fiat_used: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub matched_usdt: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub lot_rate: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub sell_rate_eff: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub pnl_fiat: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub pnl_usdt: Decimal,
    #[serde(with = "crate::domain::decimal::text_opt")]
    pub cost_usdt_of_fiat_in: Option<Decimal>,
    pub stage: Stage,
    pub created_at: TimeMs,
}
