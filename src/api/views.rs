//! JSON shapes at the HTTP boundary. Money is rendered as JSON numbers.

use crate::domain::{
    Asset, CashDesk, CashDeskId, Decimal, FiatLot, LotSource, PnlMatch, Stage, TimeMs,
    Transaction, TransactionColumns, TransactionType,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionView {
    #[serde(rename = "_id")]
    pub id: i64,
    pub cash_desk_id: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub from_asset: String,
    pub to_asset: String,
    pub amount_from: Decimal,
    pub rate_used: Decimal,
    pub fee_percent: Decimal,
    pub fee_amount: Decimal,
    pub amount_to_final: Decimal,
    pub rate_for_gleb_pnl: Option<Decimal>,
    pub profit: Decimal,
    pub profit_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_profit_usdt: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usdt_of_fiat_in: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_usdt_of_fiat_in: Option<Decimal>,
    pub note: String,
    pub created_at: i64,
    pub is_modified: bool,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        let c = TransactionColumns::from(tx);
        TransactionView {
            id: c.id,
            cash_desk_id: c.cash_desk_id,
            tx_type: c.tx_type,
            from_asset: c.from_asset,
            to_asset: c.to_asset,
            amount_from: c.amount_from,
            rate_used: c.rate_used,
            fee_percent: c.fee_percent,
            fee_amount: c.fee_amount,
            amount_to_final: c.amount_to_final,
            rate_for_gleb_pnl: c.rate_for_gleb_pnl,
            profit: c.profit,
            profit_currency: c.profit_currency,
            realized_profit_usdt: c.realized_profit_usdt,
            cost_usdt_of_fiat_in: c.cost_usdt_of_fiat_in,
            rate_usdt_of_fiat_in: c.rate_usdt_of_fiat_in,
            note: c.note,
            created_at: c.created_at,
            is_modified: c.is_modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotMeta {
    pub source: LotSource,
    pub fee_percent: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usdt_of_fiat_in: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_usdt_of_fiat_in: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotView {
    #[serde(rename = "_id")]
    pub id: i64,
    pub cash_desk_id: CashDeskId,
    pub currency: Asset,
    pub original_amount: Decimal,
    pub remaining: Decimal,
    pub rate: Decimal,
    pub tx_id: Option<i64>,
    pub created_at: TimeMs,
    pub meta: LotMeta,
}

impl From<&FiatLot> for LotView {
    fn from(lot: &FiatLot) -> Self {
        LotView {
            id: lot.id,
            cash_desk_id: lot.cash_desk_id.clone(),
            currency: lot.currency.clone(),
            original_amount: lot.original_amount,
            remaining: lot.remaining,
            rate: lot.rate,
            tx_id: lot.origin_tx_id,
            created_at: lot.created_at,
            meta: LotMeta {
                source: lot.source,
                fee_percent: lot.fee_percent,
                cost_usdt_of_fiat_in: lot.inherited_cost.map(|c| c.cost_usdt_of_fiat_in),
                rate_usdt_of_fiat_in: lot.inherited_cost.map(|c| c.rate_usdt_of_fiat_in),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchView {
    #[serde(rename = "_id")]
    pub id: i64,
    pub cash_desk_id: CashDeskId,
    pub currency: Asset,
    pub open_lot_id: i64,
    pub close_tx_id: i64,
    pub fiat_used: Decimal,
    pub matched_usdt: Decimal,
    pub lot_rate: Decimal,
    pub sell_rate_eff: Decimal,
    pub pnl_fiat: Decimal,
    pub pnl_usdt: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usdt_of_fiat_in: Option<Decimal>,
    pub stage: Stage,
    pub created_at: TimeMs,
}

impl From<&PnlMatch> for MatchView {
    fn from(m: &PnlMatch) -> Self {
        MatchView {
            id: m.id,
            cash_desk_id: m.cash_desk_id.clone(),
            currency: m.currency.clone(),
            open_lot_id: m.open_lot_id,
            close_tx_id: m.close_tx_id,
            fiat_used: m.fiat_used,
            matched_usdt: m.matched_usdt,
            lot_rate: m.lot_rate,
            sell_rate_eff: m.sell_rate_eff,
            pnl_fiat: m.pnl_fiat,
            pnl_usdt: m.pnl_usdt,
            cost_usdt_of_fiat_in: m.cost_usdt_of_fiat_in,
            stage: m.stage,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CashDeskView {
    pub id: CashDeskId,
    pub tenant_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: TimeMs,
    pub deleted_at: Option<TimeMs>,
}

impl From<&CashDesk> for CashDeskView {
    fn from(desk: &CashDesk) -> Self {
        CashDeskView {
            id: desk.id.clone(),
            tenant_id: desk.tenant_id.clone(),
            name: desk.name.clone(),
            is_active: desk.is_active,
            created_at: desk.created_at,
            deleted_at: desk.deleted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InheritedCost;

    #[test]
    fn test_lot_view_field_names() {
        let lot = FiatLot {
            id: 3,
            cash_desk_id: CashDeskId::new("main"),
            currency: Asset::new("EUR"),
            original_amount: Decimal::from(100),
            remaining: Decimal::from(40),
            rate: Decimal::from_str_canonical("0.92").unwrap(),
            origin_tx_id: Some(9),
            created_at: TimeMs::new(1000),
            source: LotSource::FiatToFiat,
            fee_percent: Decimal::zero(),
            inherited_cost: Some(InheritedCost {
                cost_usdt_of_fiat_in: Decimal::from(108),
                rate_usdt_of_fiat_in: Decimal::from_str_canonical("0.92").unwrap(),
            }),
        };
        let json = serde_json::to_value(LotView::from(&lot)).unwrap();
        assert_eq!(json["_id"], 3);
        assert_eq!(json["tx_id"], 9);
        assert_eq!(json["remaining"], 40.0);
        assert_eq!(json["meta"]["source"], "fiat_to_fiat");
        assert_eq!(json["meta"]["cost_usdt_of_fiat_in"], 108.0);
    }

    #[test]
    fn test_deposit_lot_meta_omits_inherited_cost() {
        let lot = FiatLot {
            id: 1,
            cash_desk_id: CashDeskId::new("main"),
            currency: Asset::new("CZK"),
            original_amount: Decimal::from(1000),
            remaining: Decimal::from(1000),
            rate: Decimal::from(23),
            origin_tx_id: None,
            created_at: TimeMs::new(0),
            source: LotSource::Deposit,
            fee_percent: Decimal::zero(),
            inherited_cost: None,
        };
        let json = serde_json::to_value(LotView::from(&lot)).unwrap();
        assert!(json["meta"].get("cost_usdt_of_fiat_in").is_none());
        assert_eq!(json["tx_id"], serde_json::Value::Null);
    }
}
