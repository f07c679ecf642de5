//! Financial events recorded at a cash desk.
//!
//! Each kind carries only the fields it needs. [`TransactionColumns`] is the
//! flat projection used for storage, where every kind shares one set of
//! columns.

use crate::domain::{Asset, CashDeskId, Decimal, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    FiatToCrypto,
    CryptoToFiat,
    FiatToFiat,
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::FiatToCrypto => "fiat_to_crypto",
            TransactionType::CryptoToFiat => "crypto_to_fiat",
            TransactionType::FiatToFiat => "fiat_to_fiat",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fiat_to_crypto" => Ok(TransactionType::FiatToCrypto),
            "crypto_to_fiat" => Ok(TransactionType::CryptoToFiat),
            "fiat_to_fiat" => Ok(TransactionType::FiatToFiat),
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// The priced outcome of a transaction, per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    /// Client pays fiat, receives crypto. Creates a fiat lot.
    FiatToCrypto {
        fiat: Asset,
        crypto: Asset,
        fiat_in: Decimal,
        rate_used: Decimal,
        fee_percent: Decimal,
        fee_amount: Decimal,
        crypto_out: Decimal,
        /// Fiat per USDT actually realized; the new lot's rate.
        effective_rate: Decimal,
    },
    /// Client pays crypto, receives fiat. Consumes fiat lots.
    CryptoToFiat {
        crypto: Asset,
        fiat: Asset,
        crypto_in: Decimal,
        rate_used: Decimal,
        fee_percent: Decimal,
        fee_amount: Decimal,
        fiat_out: Decimal,
        /// Fiat handed out per USDT received.
        effective_rate: Decimal,
        realized_pnl_fiat: Decimal,
        realized_pnl_usdt: Decimal,
    },
    /// Fiat exchanged for another fiat. Consumes `from` lots, creates a `to` lot.
    FiatToFiat {
        from: Asset,
        to: Asset,
        fiat_out: Decimal,
        rate_used: Decimal,
        fiat_in: Decimal,
        cost_usdt_of_fiat_in: Decimal,
        rate_usdt_of_fiat_in: Decimal,
    },
    Deposit {
        asset: Asset,
        amount: Decimal,
        rate: Option<Decimal>,
    },
    Withdrawal {
        asset: Asset,
        amount: Decimal,
    },
}

impl TransactionKind {
    pub fn tx_type(&self) -> TransactionType {
        match self {
            TransactionKind::FiatToCrypto { .. } => TransactionType::FiatToCrypto,
            TransactionKind::CryptoToFiat { .. } => TransactionType::CryptoToFiat,
            TransactionKind::FiatToFiat { .. } => TransactionType::FiatToFiat,
            TransactionKind::Deposit { .. } => TransactionType::Deposit,
            TransactionKind::Withdrawal { .. } => TransactionType::Withdrawal,
        }
    }

    /// Asset received by the desk.
    pub fn from_asset(&self) -> &Asset {
        match self {
            TransactionKind::FiatToCrypto { fiat, .. } => fiat,
            TransactionKind::CryptoToFiat { crypto, .. } => crypto,
            TransactionKind::FiatToFiat { from, .. } => from,
            TransactionKind::Deposit { asset, .. } => asset,
            TransactionKind::Withdrawal { asset, .. } => asset,
        }
    }

    /// Asset handed out by the desk, if any.
    pub fn to_asset(&self) -> Option<&Asset> {
        match self {
            TransactionKind::FiatToCrypto { crypto, .. } => Some(crypto),
            TransactionKind::CryptoToFiat { fiat, .. } => Some(fiat),
            TransactionKind::FiatToFiat { to, .. } => Some(to),
            TransactionKind::Deposit { .. } | TransactionKind::Withdrawal { .. } => None,
        }
    }

    pub fn amount_from(&self) -> Decimal {
        match self {
            TransactionKind::FiatToCrypto { fiat_in, .. } => *fiat_in,
            TransactionKind::CryptoToFiat { crypto_in, .. } => *crypto_in,
            TransactionKind::FiatToFiat { fiat_out, .. } => *fiat_out,
            TransactionKind::Deposit { amount, .. } => *amount,
            TransactionKind::Withdrawal { amount, .. } => *amount,
        }
    }

    pub fn amount_to_final(&self) -> Decimal {
        match self {
            TransactionKind::FiatToCrypto { crypto_out, .. } => *crypto_out,
            TransactionKind::CryptoToFiat { fiat_out, .. } => *fiat_out,
            TransactionKind::FiatToFiat { fiat_in, .. } => *fiat_in,
            TransactionKind::Deposit { .. } | TransactionKind::Withdrawal { .. } => {
                Decimal::zero()
            }
        }
    }

    pub fn rate_used(&self) -> Decimal {
        match self {
            TransactionKind::FiatToCrypto { rate_used, .. }
            | TransactionKind::CryptoToFiat { rate_used, .. }
            | TransactionKind::FiatToFiat { rate_used, .. } => *rate_used,
            TransactionKind::Deposit { rate, .. } => rate.unwrap_or_default(),
            TransactionKind::Withdrawal { .. } => Decimal::zero(),
        }
    }

    pub fn fee_percent(&self) -> Decimal {
        match self {
            TransactionKind::FiatToCrypto { fee_percent, .. }
            | TransactionKind::CryptoToFiat { fee_percent, .. } => *fee_percent,
            _ => Decimal::zero(),
        }
    }

    pub fn fee_amount(&self) -> Decimal {
        match self {
            TransactionKind::FiatToCrypto { fee_amount, .. }
            | TransactionKind::CryptoToFiat { fee_amount, .. } => *fee_amount,
            _ => Decimal::zero(),
        }
    }

    /// Effective rate used for cost-basis accounting.
    pub fn effective_rate(&self) -> Option<Decimal> {
        match self {
            TransactionKind::FiatToCrypto { effective_rate, .. }
            | TransactionKind::CryptoToFiat { effective_rate, .. } => Some(*effective_rate),
            TransactionKind::FiatToFiat {
                rate_usdt_of_fiat_in,
                ..
            } => Some(*rate_usdt_of_fiat_in),
            TransactionKind::Deposit { .. } | TransactionKind::Withdrawal { .. } => None,
        }
    }

    /// Realized profit in `profit_currency`.
    pub fn profit(&self) -> Decimal {
        match self {
            TransactionKind::CryptoToFiat {
                realized_pnl_fiat, ..
            } => *realized_pnl_fiat,
            _ => Decimal::zero(),
        }
    }

    pub fn profit_currency(&self) -> Option<Asset> {
        match self {
            TransactionKind::FiatToCrypto { fiat, .. } => Some(fiat.clone()),
            TransactionKind::CryptoToFiat { fiat, .. } => Some(fiat.clone()),
            TransactionKind::FiatToFiat { .. } => Some(Asset::usdt()),
            TransactionKind::Deposit { .. } | TransactionKind::Withdrawal { .. } => None,
        }
    }

    /// Signed balance changes at the desk, in application order.
    pub fn cash_deltas(&self) -> Vec<(Asset, Decimal)> {
        match self {
            TransactionKind::FiatToCrypto {
                fiat,
                crypto,
                fiat_in,
                crypto_out,
                ..
            } => vec![(fiat.clone(), *fiat_in), (crypto.clone(), -*crypto_out)],
            TransactionKind::CryptoToFiat {
                crypto,
                fiat,
                crypto_in,
                fiat_out,
                ..
            } => vec![(crypto.clone(), *crypto_in), (fiat.clone(), -*fiat_out)],
            TransactionKind::FiatToFiat {
                from,
                to,
                fiat_out,
                fiat_in,
                ..
            } => vec![(from.clone(), -*fiat_out), (to.clone(), *fiat_in)],
            TransactionKind::Deposit { asset, amount, .. } => vec![(asset.clone(), *amount)],
            TransactionKind::Withdrawal { asset, amount } => vec![(asset.clone(), -*amount)],
        }
    }

    /// Currencies whose lots or balances this transaction touches; the lock set.
    pub fn lock_currencies(&self) -> Vec<Asset> {
        match self {
            TransactionKind::FiatToCrypto { fiat, .. }
            | TransactionKind::CryptoToFiat { fiat, .. } => vec![fiat.clone()],
            TransactionKind::FiatToFiat { from, to, .. } => vec![from.clone(), to.clone()],
            TransactionKind::Deposit { asset, .. } | TransactionKind::Withdrawal { asset, .. } => {
                vec![asset.clone()]
            }
        }
    }
}

/// A recorded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: i64,
    pub cash_desk_id: CashDeskId,
    pub kind: TransactionKind,
    pub note: String,
    pub created_at: TimeMs,
    pub is_modified: bool,
}

/// Flat projection of a transaction, one field per stored column.
///
/// Serializes losslessly (decimals as strings) for undo snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionColumns {
    pub id: i64,
    pub cash_desk_id: String,
    pub tx_type: TransactionType,
    pub from_asset: String,
    pub to_asset: String,
    #[serde(with = "crate::domain::decimal::text")]
    pub amount_from: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub rate_used: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub fee_percent: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub fee_amount: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub amount_to_final: Decimal,
    #[serde(with = "crate::domain::decimal::text_opt")]
    pub rate_for_gleb_pnl: Option<Decimal>,
    #[serde(with = "crate::domain::decimal::text")]
    pub profit: Decimal,
    pub profit_currency: Option<String>,
    #[serde(with = "crate::domain::decimal::text_opt")]
    pub realized_profit_usdt: Option<Decimal>,
    #[serde(with = "crate::domain::decimal::text_opt")]
    pub cost_usdt_of_fiat_in: Option<Decimal>,
    #[serde(with = "crate::domain::decimal::text_opt")]
    pub rate_usdt_of_fiat_in: Option<Decimal>,
    pub note: String,
    pub created_at: i64,
    pub is_modified: bool,
}

impl From<&Transaction> for TransactionColumns {
    fn from(tx: &Transaction) -> Self {
        let kind = &tx.kind;
        let (cost_usdt_of_fiat_in, rate_usdt_of_fiat_in) = match kind {
            TransactionKind::FiatToFiat {
                cost_usdt_of_fiat_in,
                rate_usdt_of_fiat_in,
                ..
            } => (Some(*cost_usdt_of_fiat_in), Some(*rate_usdt_of_fiat_in)),
            _ => (None, None),
        };
        let realized_profit_usdt = match kind {
            TransactionKind::CryptoToFiat {
                realized_pnl_usdt, ..
            } => Some(*realized_pnl_usdt),
            _ => None,
        };

        TransactionColumns {
            id: tx.id,
            cash_desk_id: tx.cash_desk_id.as_str().to_string(),
            tx_type: kind.tx_type(),
            from_asset: kind.from_asset().to_string(),
            to_asset: kind.to_asset().map(|a| a.to_string()).unwrap_or_default(),
            amount_from: kind.amount_from(),
            rate_used: kind.rate_used(),
            fee_percent: kind.fee_percent(),
            fee_amount: kind.fee_amount(),
            amount_to_final: kind.amount_to_final(),
            rate_for_gleb_pnl: kind.effective_rate(),
            profit: kind.profit(),
            profit_currency: kind.profit_currency().map(String::from),
            realized_profit_usdt,
            cost_usdt_of_fiat_in,
            rate_usdt_of_fiat_in,
            note: tx.note.clone(),
            created_at: tx.created_at.as_ms(),
            is_modified: tx.is_modified,
        }
    }
}

impl TryFrom<TransactionColumns> for Transaction {
    type Error = String;

    fn try_from(c: TransactionColumns) -> Result<Self, Self::Error> {
        let missing = |field: &str| format!("transaction {} is missing {}", c.id, field);
        let from = Asset::new(&c.from_asset);
        let to = Asset::new(&c.to_asset);

        let kind = match c.tx_type {
            TransactionType::FiatToCrypto => TransactionKind::FiatToCrypto {
                fiat: from,
                crypto: to,
                fiat_in: c.amount_from,
                rate_used: c.rate_used,
                fee_percent: c.fee_percent,
                fee_amount: c.fee_amount,
                crypto_out: c.amount_to_final,
                effective_rate: c
                    .rate_for_gleb_pnl
                    .ok_or_else(|| missing("rate_for_gleb_pnl"))?,
            },
            TransactionType::CryptoToFiat => TransactionKind::CryptoToFiat {
                crypto: from,
                fiat: to,
                crypto_in: c.amount_from,
                rate_used: c.rate_used,
                fee_percent: c.fee_percent,
                fee_amount: c.fee_amount,
                fiat_out: c.amount_to_final,
                effective_rate: c
                    .rate_for_gleb_pnl
                    .ok_or_else(|| missing("rate_for_gleb_pnl"))?,
                realized_pnl_fiat: c.profit,
                realized_pnl_usdt: c.realized_profit_usdt.unwrap_or_default(),
            },
            TransactionType::FiatToFiat => TransactionKind::FiatToFiat {
                from,
                to,
                fiat_out: c.amount_from,
                rate_used: c.rate_used,
                fiat_in: c.amount_to_final,
                cost_usdt_of_fiat_in: c
                    .cost_usdt_of_fiat_in
                    .ok_or_else(|| missing("cost_usdt_of_fiat_in"))?,
                rate_usdt_of_fiat_in: c
                    .rate_usdt_of_fiat_in
                    .ok_or_else(|| missing("rate_usdt_of_fiat_in"))?,
            },
            TransactionType::Deposit => TransactionKind::Deposit {
                asset: from,
                amount: c.amount_from,
                rate: Some(c.rate_used).filter(|r| r.is_positive()),
            },
            TransactionType::Withdrawal => TransactionKind::Withdrawal {
                asset: from,
                amount: c.amount_from,
            },
        };

        Ok(Transaction {
            id: c.id,
            cash_desk_id: CashDeskId::new(c.cash_desk_id),
            kind,
            note: c.note,
            created_at: TimeMs::new(c.created_at),
            is_modified: c.is_modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn sell_tx() -> Transaction {
        Transaction {
            id: 7,
            cash_desk_id: CashDeskId::new("main"),
            kind: TransactionKind::CryptoToFiat {
                crypto: Asset::usdt(),
                fiat: Asset::new("CZK"),
                crypto_in: d("30"),
                rate_used: d("23.5"),
                fee_percent: d("0"),
                fee_amount: d("0"),
                fiat_out: d("705"),
                effective_rate: d("23.5"),
                realized_pnl_fiat: d("15.33"),
                realized_pnl_usdt: d("0.6652"),
            },
            note: "walk-in".to_string(),
            created_at: TimeMs::new(1000),
            is_modified: false,
        }
    }

    #[test]
    fn test_columns_projection_for_sell() {
        let cols = TransactionColumns::from(&sell_tx());
        assert_eq!(cols.tx_type, TransactionType::CryptoToFiat);
        assert_eq!(cols.from_asset, "USDT");
        assert_eq!(cols.to_asset, "CZK");
        assert_eq!(cols.profit, d("15.33"));
        assert_eq!(cols.profit_currency.as_deref(), Some("CZK"));
        assert_eq!(cols.rate_for_gleb_pnl, Some(d("23.5")));
        assert_eq!(cols.cost_usdt_of_fiat_in, None);
    }

    #[test]
    fn test_columns_reconstruct_kind() {
        let tx = sell_tx();
        let back = Transaction::try_from(TransactionColumns::from(&tx)).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn test_deposit_without_rate_reconstructs_none() {
        let tx = Transaction {
            id: 1,
            cash_desk_id: CashDeskId::new("main"),
            kind: TransactionKind::Deposit {
                asset: Asset::usdt(),
                amount: d("100"),
                rate: None,
            },
            note: String::new(),
            created_at: TimeMs::new(0),
            is_modified: false,
        };
        let cols = TransactionColumns::from(&tx);
        assert_eq!(cols.to_asset, "");
        assert_eq!(cols.profit_currency, None);
        assert_eq!(Transaction::try_from(cols).unwrap(), tx);
    }

    #[test]
    fn test_snapshot_json_keeps_decimals_as_text() {
        let cols = TransactionColumns::from(&sell_tx());
        let json = serde_json::to_value(&cols).unwrap();
        assert_eq!(json["tx_type"], "crypto_to_fiat");
        assert_eq!(json["profit"], "15.33");
        assert_eq!(json["cost_usdt_of_fiat_in"], serde_json::Value::Null);

        let back: TransactionColumns = serde_json::from_value(json).unwrap();
        assert_eq!(back, cols);
    }

    #[test]
    fn test_sell_moves_cash_both_ways() {
        let deltas = sell_tx().kind.cash_deltas();
        assert_eq!(
            deltas,
            vec![(Asset::usdt(), d("30")), (Asset::new("CZK"), d("-705"))]
        );
        assert_eq!(sell_tx().kind.lock_currencies(), vec![Asset::new("CZK")]);
    }

    #[test]
    fn test_missing_cost_basis_is_rejected() {
        let mut cols = TransactionColumns::from(&sell_tx());
        cols.tx_type = TransactionType::FiatToFiat;
        let err = Transaction::try_from(cols).unwrap_err();
        assert!(err.contains("cost_usdt_of_fiat_in"));
    }
}
