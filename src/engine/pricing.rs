//! Derivation of transaction outputs from an operator request.
//!
//! Lot rates and effective rates are always fiat per USDT, whatever the
//! quoting convention of the fiat's `rate_used`.

use crate::config::{Config, Quote};
use crate::domain::{
    Asset, CashDeskId, Decimal, InheritedCost, LotSource, NewLot, TransactionKind,
    TransactionType,
};
use crate::engine::checked;
use crate::engine::matching::{ClosePricing, CloseRequest, MatchPlan};
use crate::error::LedgerError;
use serde::Deserialize;

/// Body of a create-transaction request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExchangeRequest {
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub from_asset: Asset,
    #[serde(default = "empty_asset")]
    pub to_asset: Asset,
    pub amount_from: Decimal,
    #[serde(default)]
    pub rate_used: Decimal,
    #[serde(default)]
    pub fee_percent: Decimal,
    #[serde(default)]
    pub note: String,
}

fn empty_asset() -> Asset {
    Asset::new("")
}

/// A priced exchange, before any lots are matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricedExchange {
    FiatToCrypto {
        fiat: Asset,
        crypto: Asset,
        fiat_in: Decimal,
        rate_used: Decimal,
        fee_percent: Decimal,
        fee_amount: Decimal,
        crypto_out: Decimal,
        effective_rate: Decimal,
    },
    CryptoToFiat {
        crypto: Asset,
        fiat: Asset,
        crypto_in: Decimal,
        rate_used: Decimal,
        fee_percent: Decimal,
        fee_amount: Decimal,
        fiat_out: Decimal,
        effective_rate: Decimal,
    },
    FiatToFiat {
        from: Asset,
        to: Asset,
        fiat_out: Decimal,
        rate_used: Decimal,
        fiat_in: Decimal,
    },
}

/// The final shape of a transaction once its close (if any) is planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub kind: TransactionKind,
    /// Lot to create; `origin_tx_id` is filled in once the transaction exists.
    pub lot: Option<NewLot>,
}

pub fn price_exchange(
    request: &ExchangeRequest,
    config: &Config,
) -> Result<PricedExchange, LedgerError> {
    let from = &request.from_asset;
    let to = &request.to_asset;
    if from.is_empty() || to.is_empty() {
        return Err(LedgerError::InvalidAmount(
            "from_asset and to_asset are required".to_string(),
        ));
    }
    if from == to {
        return Err(LedgerError::InvalidAmount(format!(
            "cannot exchange {} for itself",
            from
        )));
    }
    require_positive("amount_from", request.amount_from)?;
    require_positive("rate_used", request.rate_used)?;
    if request.fee_percent.is_negative() {
        return Err(LedgerError::InvalidAmount(format!(
            "fee_percent must not be negative, got {}",
            request.fee_percent
        )));
    }

    let priced = match request.tx_type {
        TransactionType::FiatToCrypto => {
            require_fiat(config, from, "from_asset")?;
            require_usdt(to, "to_asset")?;
            let fiat_in = fiat_amount("amount_from", request.amount_from)?;
            let usdt_clean = match config.quote_for(from) {
                Quote::Direct => checked::div("amount_to_final", fiat_in, request.rate_used)?,
                Quote::Inverse => checked::mul("amount_to_final", fiat_in, request.rate_used)?,
            };
            let divisor = checked::add(
                "fee_percent",
                Decimal::one(),
                request.fee_percent.percent_fraction(),
            )?;
            let crypto_out = checked::div("amount_to_final", usdt_clean, divisor)?.round_crypto();
            require_positive("amount_to_final", crypto_out)?;
            let fee_amount = checked::sub("fee_amount", usdt_clean, crypto_out)?.round_crypto();
            let effective_rate = checked::div("effective_rate", fiat_in, crypto_out)?;

            PricedExchange::FiatToCrypto {
                fiat: from.clone(),
                crypto: to.clone(),
                fiat_in,
                rate_used: request.rate_used,
                fee_percent: request.fee_percent,
                fee_amount,
                crypto_out,
                effective_rate,
            }
        }
        TransactionType::CryptoToFiat => {
            require_usdt(from, "from_asset")?;
            require_fiat(config, to, "to_asset")?;
            let crypto_in = crypto_amount("amount_from", request.amount_from)?;
            let fiat_clean = match config.quote_for(to) {
                Quote::Direct => checked::mul("amount_to_final", crypto_in, request.rate_used)?,
                Quote::Inverse => checked::div("amount_to_final", crypto_in, request.rate_used)?,
            };
            let fee_amount = checked::mul(
                "fee_amount",
                fiat_clean,
                request.fee_percent.percent_fraction(),
            )?
            .round_fiat();
            let fiat_out = checked::add("amount_to_final", fiat_clean, fee_amount)?.round_fiat();
            require_positive("amount_to_final", fiat_out)?;
            let effective_rate = checked::div("effective_rate", fiat_out, crypto_in)?;

            PricedExchange::CryptoToFiat {
                crypto: from.clone(),
                fiat: to.clone(),
                crypto_in,
                rate_used: request.rate_used,
                fee_percent: request.fee_percent,
                fee_amount,
                fiat_out,
                effective_rate,
            }
        }
        TransactionType::FiatToFiat => {
            require_fiat(config, from, "from_asset")?;
            require_fiat(config, to, "to_asset")?;
            let fiat_out = fiat_amount("amount_from", request.amount_from)?;
            let fiat_in =
                checked::div("amount_to_final", fiat_out, request.rate_used)?.round_fiat();
            require_positive("amount_to_final", fiat_in)?;

            PricedExchange::FiatToFiat {
                from: from.clone(),
                to: to.clone(),
                fiat_out,
                rate_used: request.rate_used,
                fiat_in,
            }
        }
        TransactionType::Deposit | TransactionType::Withdrawal => {
            return Err(LedgerError::InvalidAmount(format!(
                "{} is not an exchange",
                request.tx_type
            )))
        }
    };

    Ok(priced)
}

impl PricedExchange {
    pub fn tx_type(&self) -> TransactionType {
        match self {
            PricedExchange::FiatToCrypto { .. } => TransactionType::FiatToCrypto,
            PricedExchange::CryptoToFiat { .. } => TransactionType::CryptoToFiat,
            PricedExchange::FiatToFiat { .. } => TransactionType::FiatToFiat,
        }
    }

    /// The asset and amount the desk hands out.
    pub fn payout(&self) -> (&Asset, Decimal) {
        match self {
            PricedExchange::FiatToCrypto {
                crypto, crypto_out, ..
            } => (crypto, *crypto_out),
            PricedExchange::CryptoToFiat { fiat, fiat_out, .. } => (fiat, *fiat_out),
            PricedExchange::FiatToFiat { from, fiat_out, .. } => (from, *fiat_out),
        }
    }

    /// Fiat currencies whose lots this exchange touches.
    pub fn lot_currencies(&self) -> Vec<Asset> {
        match self {
            PricedExchange::FiatToCrypto { fiat, .. } => vec![fiat.clone()],
            PricedExchange::CryptoToFiat { fiat, .. } => vec![fiat.clone()],
            PricedExchange::FiatToFiat { from, to, .. } => vec![from.clone(), to.clone()],
        }
    }

    /// Lots to consume, if this exchange pays out fiat.
    pub fn close_request(&self) -> Option<CloseRequest> {
        match self {
            PricedExchange::FiatToCrypto { .. } => None,
            PricedExchange::CryptoToFiat {
                fiat,
                fiat_out,
                effective_rate,
                ..
            } => Some(CloseRequest {
                currency: fiat.clone(),
                fiat_amount: *fiat_out,
                pricing: ClosePricing::Sell {
                    effective_rate: *effective_rate,
                },
            }),
            PricedExchange::FiatToFiat { from, fiat_out, .. } => Some(CloseRequest {
                currency: from.clone(),
                fiat_amount: *fiat_out,
                pricing: ClosePricing::CostTransfer,
            }),
        }
    }

    /// Combine pricing with the planned close into the stored transaction and
    /// the lot it opens.
    pub fn settle(self, desk: &CashDeskId, plan: &MatchPlan) -> Result<Settlement, LedgerError> {
        let settlement = match self {
            PricedExchange::FiatToCrypto {
                fiat,
                crypto,
                fiat_in,
                rate_used,
                fee_percent,
                fee_amount,
                crypto_out,
                effective_rate,
            } => Settlement {
                lot: Some(NewLot {
                    cash_desk_id: desk.clone(),
                    currency: fiat.clone(),
                    amount: fiat_in,
                    rate: effective_rate,
                    source: LotSource::FiatToCrypto,
                    fee_percent,
                    origin_tx_id: None,
                    inherited_cost: None,
                }),
                kind: TransactionKind::FiatToCrypto {
                    fiat,
                    crypto,
                    fiat_in,
                    rate_used,
                    fee_percent,
                    fee_amount,
                    crypto_out,
                    effective_rate,
                },
            },
            PricedExchange::CryptoToFiat {
                crypto,
                fiat,
                crypto_in,
                rate_used,
                fee_percent,
                fee_amount,
                fiat_out,
                effective_rate,
            } => Settlement {
                lot: None,
                kind: TransactionKind::CryptoToFiat {
                    crypto,
                    fiat,
                    crypto_in,
                    rate_used,
                    fee_percent,
                    fee_amount,
                    fiat_out,
                    effective_rate,
                    realized_pnl_fiat: plan.total_pnl_fiat().round_fiat(),
                    realized_pnl_usdt: plan.total_pnl_usdt().round_crypto(),
                },
            },
            PricedExchange::FiatToFiat {
                from,
                to,
                fiat_out,
                rate_used,
                fiat_in,
            } => {
                let cost = plan.total_matched_usdt();
                if !cost.is_positive() {
                    return Err(LedgerError::InsufficientFiatLots {
                        currency: from,
                        required: fiat_out,
                        available: plan.total_fiat_used(),
                    });
                }
                let rate_usdt_of_fiat_in = checked::div("rate_usdt_of_fiat_in", fiat_in, cost)?;
                let inherited = InheritedCost {
                    cost_usdt_of_fiat_in: cost,
                    rate_usdt_of_fiat_in,
                };
                Settlement {
                    lot: Some(NewLot {
                        cash_desk_id: desk.clone(),
                        currency: to.clone(),
                        amount: fiat_in,
                        rate: rate_usdt_of_fiat_in,
                        source: LotSource::FiatToFiat,
                        fee_percent: Decimal::zero(),
                        origin_tx_id: None,
                        inherited_cost: Some(inherited),
                    }),
                    kind: TransactionKind::FiatToFiat {
                        from,
                        to,
                        fiat_out,
                        rate_used,
                        fiat_in,
                        cost_usdt_of_fiat_in: cost,
                        rate_usdt_of_fiat_in,
                    },
                }
            }
        };
        Ok(settlement)
    }
}

/// Lot rate (fiat per USDT) for a fiat deposit quoted in the asset's convention.
pub fn deposit_lot_rate(
    config: &Config,
    asset: &Asset,
    rate: Decimal,
) -> Result<Decimal, LedgerError> {
    require_positive("rate", rate)?;
    Ok(match config.quote_for(asset) {
        Quote::Direct => rate,
        Quote::Inverse => checked::div("rate", Decimal::one(), rate)?,
    })
}

/// Validate and normalize a cash amount to the asset's precision.
///
/// Only configured fiat currencies and USDT are held in cash.
pub fn cash_amount(
    config: &Config,
    asset: &Asset,
    amount: Decimal,
) -> Result<Decimal, LedgerError> {
    if asset.is_empty() {
        return Err(LedgerError::InvalidAmount("asset is required".to_string()));
    }
    require_positive("amount", amount)?;
    if config.is_fiat(asset) {
        fiat_amount("amount", amount)
    } else if *asset == Asset::usdt() {
        crypto_amount("amount", amount)
    } else {
        Err(LedgerError::InvalidAmount(format!(
            "asset must be USDT or a configured fiat currency, got {}",
            asset
        )))
    }
}

fn require_positive(field: &str, value: Decimal) -> Result<(), LedgerError> {
    if value.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(format!(
            "{} must be positive, got {}",
            field, value
        )))
    }
}

fn require_fiat(config: &Config, asset: &Asset, field: &str) -> Result<(), LedgerError> {
    if config.is_fiat(asset) {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(format!(
            "{} must be a fiat currency, got {}",
            field, asset
        )))
    }
}

fn require_usdt(asset: &Asset, field: &str) -> Result<(), LedgerError> {
    if *asset == Asset::usdt() {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(format!(
            "{} must be USDT, got {}",
            field, asset
        )))
    }
}

fn fiat_amount(field: &str, value: Decimal) -> Result<Decimal, LedgerError> {
    precise_to(field, value, crate::domain::decimal::FIAT_DP)
}

fn crypto_amount(field: &str, value: Decimal) -> Result<Decimal, LedgerError> {
    precise_to(field, value, crate::domain::decimal::CRYPTO_DP)
}

fn precise_to(field: &str, value: Decimal, dp: u32) -> Result<Decimal, LedgerError> {
    if value.round_dp(dp) != value {
        return Err(LedgerError::InvalidAmount(format!(
            "{} has more than {} decimal places: {}",
            field, dp, value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::matching::plan_close;
    use crate::domain::{FiatLot, TimeMs};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn config() -> Config {
        Config::with_database(":memory:")
    }

    fn request(
        tx_type: TransactionType,
        from: &str,
        to: &str,
        amount: &str,
        rate: &str,
        fee: &str,
    ) -> ExchangeRequest {
        ExchangeRequest {
            tx_type,
            from_asset: Asset::new(from),
            to_asset: Asset::new(to),
            amount_from: d(amount),
            rate_used: d(rate),
            fee_percent: d(fee),
            note: String::new(),
        }
    }

    #[test]
    fn test_fiat_to_crypto_direct_quote() {
        let req = request(TransactionType::FiatToCrypto, "CZK", "USDT", "2300", "23", "0");
        match price_exchange(&req, &config()).unwrap() {
            PricedExchange::FiatToCrypto {
                crypto_out,
                fee_amount,
                effective_rate,
                ..
            } => {
                assert_eq!(crypto_out, d("100"));
                assert!(fee_amount.is_zero());
                assert_eq!(effective_rate, d("23"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fiat_to_crypto_fee_raises_lot_rate() {
        let req = request(TransactionType::FiatToCrypto, "CZK", "USDT", "2300", "23", "2");
        match price_exchange(&req, &config()).unwrap() {
            PricedExchange::FiatToCrypto {
                crypto_out,
                fee_amount,
                effective_rate,
                ..
            } => {
                assert_eq!(crypto_out, d("98.03921569"));
                assert_eq!(fee_amount, d("1.96078431"));
                assert!(effective_rate > d("23"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_inverse_quote_multiplies() {
        let req = request(TransactionType::FiatToCrypto, "EUR", "USDT", "100", "1.08", "0");
        match price_exchange(&req, &config()).unwrap() {
            PricedExchange::FiatToCrypto {
                crypto_out,
                effective_rate,
                ..
            } => {
                assert_eq!(crypto_out, d("108"));
                assert_eq!(effective_rate.round_dp(8), d("0.92592593"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_crypto_to_fiat_close_request() {
        let req = request(TransactionType::CryptoToFiat, "USDT", "CZK", "30", "23.5", "0");
        let priced = price_exchange(&req, &config()).unwrap();
        let close = priced.close_request().unwrap();
        assert_eq!(close.currency, Asset::new("CZK"));
        assert_eq!(close.fiat_amount, d("705"));
        assert_eq!(
            close.pricing,
            ClosePricing::Sell {
                effective_rate: d("23.5")
            }
        );
        assert_eq!(priced.payout(), (&Asset::new("CZK"), d("705")));
    }

    #[test]
    fn test_crypto_to_fiat_fee_rounded_to_cents() {
        let req = request(TransactionType::CryptoToFiat, "USDT", "CZK", "10", "23.333", "1");
        match price_exchange(&req, &config()).unwrap() {
            PricedExchange::CryptoToFiat {
                fee_amount,
                fiat_out,
                ..
            } => {
                assert_eq!(fee_amount, d("2.33"));
                assert_eq!(fiat_out, d("235.66"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fiat_to_fiat_divides_and_has_no_fee() {
        let req = request(TransactionType::FiatToFiat, "CZK", "EUR", "2500", "25", "3");
        match price_exchange(&req, &config()).unwrap() {
            PricedExchange::FiatToFiat { fiat_in, .. } => assert_eq!(fiat_in, d("100")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fiat_to_fiat_settles_cost_basis() {
        let req = request(TransactionType::FiatToFiat, "CZK", "EUR", "2300", "25", "0");
        let priced = price_exchange(&req, &config()).unwrap();
        let lot = FiatLot {
            id: 1,
            cash_desk_id: CashDeskId::new("main"),
            currency: Asset::new("CZK"),
            original_amount: d("5000"),
            remaining: d("5000"),
            rate: d("23"),
            origin_tx_id: None,
            created_at: TimeMs::new(0),
            source: LotSource::Deposit,
            fee_percent: Decimal::zero(),
            inherited_cost: None,
        };
        let plan = plan_close(&[lot], &priced.close_request().unwrap()).unwrap();
        let settlement = priced.settle(&CashDeskId::new("main"), &plan).unwrap();

        let new_lot = settlement.lot.unwrap();
        assert_eq!(new_lot.currency, Asset::new("EUR"));
        assert_eq!(new_lot.amount, d("92"));
        assert_eq!(new_lot.source, LotSource::FiatToFiat);
        let inherited = new_lot.inherited_cost.unwrap();
        assert_eq!(inherited.cost_usdt_of_fiat_in, d("100"));
        assert_eq!(new_lot.rate, d("0.92"));
        assert!(settlement.kind.profit().is_zero());
        assert_eq!(settlement.kind.profit_currency(), Some(Asset::usdt()));
    }

    #[test]
    fn test_validation_errors() {
        let cfg = config();
        let cases = vec![
            request(TransactionType::FiatToCrypto, "CZK", "USDT", "0", "23", "0"),
            request(TransactionType::FiatToCrypto, "CZK", "USDT", "100", "-1", "0"),
            request(TransactionType::FiatToCrypto, "CZK", "USDT", "100", "23", "-1"),
            request(TransactionType::FiatToCrypto, "USDT", "CZK", "100", "23", "0"),
            request(TransactionType::CryptoToFiat, "USDT", "BTC", "100", "23", "0"),
            request(TransactionType::FiatToFiat, "CZK", "CZK", "100", "1", "0"),
            request(TransactionType::FiatToCrypto, "CZK", "USDT", "100.001", "23", "0"),
            request(TransactionType::Deposit, "CZK", "USDT", "100", "23", "0"),
        ];
        for req in cases {
            let err = price_exchange(&req, &cfg).unwrap_err();
            assert!(
                matches!(err, LedgerError::InvalidAmount(_)),
                "expected InvalidAmount for {:?}",
                req
            );
        }
    }

    #[test]
    fn test_out_of_range_amounts_are_rejected() {
        let huge = "1000000000000000000000000000";
        let req = request(TransactionType::FiatToCrypto, "CZK", "USDT", huge, "0.0001", "0");
        assert!(matches!(
            price_exchange(&req, &config()),
            Err(LedgerError::InvalidAmount(_))
        ));

        let req = request(TransactionType::CryptoToFiat, "USDT", "CZK", huge, "1000", "0");
        assert!(matches!(
            price_exchange(&req, &config()),
            Err(LedgerError::InvalidAmount(_))
        ));

        let req = request(TransactionType::FiatToFiat, "CZK", "EUR", huge, "0.001", "0");
        assert!(matches!(
            price_exchange(&req, &config()),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_cash_amount_limited_to_fiat_and_usdt() {
        let cfg = config();
        assert_eq!(
            cash_amount(&cfg, &Asset::new("CZK"), d("10.5")).unwrap(),
            d("10.5")
        );
        assert_eq!(
            cash_amount(&cfg, &Asset::usdt(), d("0.12345678")).unwrap(),
            d("0.12345678")
        );
        assert!(cash_amount(&cfg, &Asset::new("CZK"), d("10.001")).is_err());
        let err = cash_amount(&cfg, &Asset::new("DOGE"), d("1")).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[test]
    fn test_deposit_lot_rate_inverts_inverse_quotes() {
        let cfg = config();
        assert_eq!(
            deposit_lot_rate(&cfg, &Asset::new("CZK"), d("23")).unwrap(),
            d("23")
        );
        assert_eq!(
            deposit_lot_rate(&cfg, &Asset::new("EUR"), d("1.25")).unwrap(),
            d("0.8")
        );
        assert!(deposit_lot_rate(&cfg, &Asset::new("CZK"), d("0")).is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: ExchangeRequest = serde_json::from_str(
            r#"{"type":"crypto_to_fiat","from_asset":"usdt","to_asset":"czk",
                "amount_from":30,"rate_used":23.5}"#,
        )
        .unwrap();
        assert_eq!(req.tx_type, TransactionType::CryptoToFiat);
        assert_eq!(req.from_asset, Asset::usdt());
        assert!(req.fee_percent.is_zero());
        assert_eq!(req.note, "");
    }
}
