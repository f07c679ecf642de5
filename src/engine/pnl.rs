//! Realized-profit summaries per currency.
//!
//! Summaries keep raw sums so that merging per-desk summaries gives exactly
//! the summary of the union. Rounding is applied only by [`ProfitSummary::view`].

use crate::domain::decimal::{FIAT_DP, RATE_REPORT_DP, USDT_REPORT_DP};
use crate::domain::{Asset, Decimal, FiatLot, PnlMatch, Stage};
use serde::Serialize;

/// Transactions counted toward a currency's summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionCounts {
    /// fiat_to_crypto paid in this currency.
    pub buy_count: u64,
    /// crypto_to_fiat paid out in this currency.
    pub sell_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealizedProfit {
    pub fiat: Decimal,
    pub usdt: Decimal,
}

impl RealizedProfit {
    fn add(&mut self, m: &PnlMatch) {
        self.fiat = self.fiat.saturating_add(m.pnl_fiat);
        self.usdt = self.usdt.saturating_add(m.pnl_usdt);
    }

    fn merge(&mut self, other: &RealizedProfit) {
        self.fiat = self.fiat.saturating_add(other.fiat);
        self.usdt = self.usdt.saturating_add(other.usdt);
    }
}

/// Rate statistics over open lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStats {
    pub min: Decimal,
    pub max: Decimal,
    /// Σ rate, for the plain average.
    pub rate_sum: Decimal,
    /// Σ rate × remaining, for the remaining-weighted average.
    pub weighted_sum: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitSummary {
    pub currency: Asset,
    pub realized: RealizedProfit,
    pub realized_direct: RealizedProfit,
    pub realized_exchanged: RealizedProfit,
    pub open_lot_count: u64,
    pub open_total: Decimal,
    pub rates: Option<RateStats>,
    pub counts: TransactionCounts,
    pub match_count: u64,
}

impl ProfitSummary {
    pub fn empty(currency: Asset) -> Self {
        Self {
            currency,
            realized: RealizedProfit::default(),
            realized_direct: RealizedProfit::default(),
            realized_exchanged: RealizedProfit::default(),
            open_lot_count: 0,
            open_total: Decimal::zero(),
            rates: None,
            counts: TransactionCounts::default(),
            match_count: 0,
        }
    }

    /// Summarize one scope. Lots and matches of other currencies are ignored.
    pub fn compute(
        currency: &Asset,
        lots: &[FiatLot],
        matches: &[PnlMatch],
        counts: TransactionCounts,
    ) -> Self {
        let mut summary = Self::empty(currency.clone());
        summary.counts = counts;

        for m in matches.iter().filter(|m| &m.currency == currency) {
            summary.realized.add(m);
            match m.stage {
                Stage::Direct => summary.realized_direct.add(m),
                Stage::Exchanged => summary.realized_exchanged.add(m),
            }
            summary.match_count += 1;
        }

        for lot in lots
            .iter()
            .filter(|l| &l.currency == currency && l.remaining.is_positive())
        {
            summary.open_lot_count += 1;
            summary.open_total = summary.open_total.saturating_add(lot.remaining);
            let weighted = lot.rate.saturating_mul(lot.remaining);
            summary.rates = Some(match summary.rates {
                None => RateStats {
                    min: lot.rate,
                    max: lot.rate,
                    rate_sum: lot.rate,
                    weighted_sum: weighted,
                },
                Some(stats) => RateStats {
                    min: stats.min.min(lot.rate),
                    max: stats.max.max(lot.rate),
                    rate_sum: stats.rate_sum.saturating_add(lot.rate),
                    weighted_sum: stats.weighted_sum.saturating_add(weighted),
                },
            });
        }

        summary
    }

    /// Fold another scope's summary of the same currency into this one.
    pub fn merge(&mut self, other: &ProfitSummary) {
        self.realized.merge(&other.realized);
        self.realized_direct.merge(&other.realized_direct);
        self.realized_exchanged.merge(&other.realized_exchanged);
        self.open_lot_count += other.open_lot_count;
        self.open_total = self.open_total.saturating_add(other.open_total);
        self.rates = match (self.rates, other.rates) {
            (None, r) | (r, None) => r,
            (Some(a), Some(b)) => Some(RateStats {
                min: a.min.min(b.min),
                max: a.max.max(b.max),
                rate_sum: a.rate_sum.saturating_add(b.rate_sum),
                weighted_sum: a.weighted_sum.saturating_add(b.weighted_sum),
            }),
        };
        self.counts.buy_count += other.counts.buy_count;
        self.counts.sell_count += other.counts.sell_count;
        self.match_count += other.match_count;
    }

    pub fn merge_all<'a>(
        currency: &Asset,
        parts: impl IntoIterator<Item = &'a ProfitSummary>,
    ) -> Self {
        let mut total = Self::empty(currency.clone());
        for part in parts {
            total.merge(part);
        }
        total
    }

    /// Rounded report: fiat 2 dp, USDT 4 dp, rates 5 dp.
    pub fn view(&self) -> ProfitSummaryView {
        let rates_info = self.rates.and_then(|r| {
            let count = Decimal::from(self.open_lot_count as i64);
            let avg = r.rate_sum.checked_div(count)?;
            let weighted = r
                .weighted_sum
                .checked_div(self.open_total)
                .unwrap_or_default();
            Some(RatesInfo {
                min_rate: r.min.round_dp(RATE_REPORT_DP),
                max_rate: r.max.round_dp(RATE_REPORT_DP),
                avg_rate: avg.round_dp(RATE_REPORT_DP),
                weighted_avg_rate: weighted.round_dp(RATE_REPORT_DP),
            })
        });

        ProfitSummaryView {
            currency: self.currency.clone(),
            realized_profit: self.realized.view(),
            realized_by_stage: StageProfitView {
                stage_1: self.realized_direct.view(),
                stage_2: self.realized_exchanged.view(),
            },
            remaining_lots: RemainingLotsView {
                count: self.open_lot_count,
                total_value: self.open_total.round_dp(FIAT_DP),
            },
            rates_info,
            transactions: TransactionCountsView {
                buy_count: self.counts.buy_count,
                sell_count: self.counts.sell_count,
            },
            pnl_matches_count: self.match_count,
        }
    }
}

impl RealizedProfit {
    fn view(&self) -> RealizedProfitView {
        RealizedProfitView {
            fiat: self.fiat.round_dp(FIAT_DP),
            usdt: self.usdt.round_dp(USDT_REPORT_DP),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfitSummaryView {
    pub currency: Asset,
    pub realized_profit: RealizedProfitView,
    pub realized_by_stage: StageProfitView,
    pub remaining_lots: RemainingLotsView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rates_info: Option<RatesInfo>,
    pub transactions: TransactionCountsView,
    pub pnl_matches_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RealizedProfitView {
    pub fiat: Decimal,
    pub usdt: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageProfitView {
    pub stage_1: RealizedProfitView,
    pub stage_2: RealizedProfitView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemainingLotsView {
    pub count: u64,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatesInfo {
    pub min_rate: Decimal,
    pub max_rate: Decimal,
    pub avg_rate: Decimal,
    pub weighted_avg_rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionCountsView {
    pub buy_count: u64,
    pub sell_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CashDeskId, LotSource, TimeMs};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn lot(id: i64, desk: &str, remaining: &str, rate: &str) -> FiatLot {
        FiatLot {
            id,
            cash_desk_id: CashDeskId::new(desk),
            currency: Asset::new("CZK"),
            original_amount: d("1000"),
            remaining: d(remaining),
            rate: d(rate),
            origin_tx_id: None,
            created_at: TimeMs::new(id),
            source: LotSource::FiatToCrypto,
            fee_percent: Decimal::zero(),
            inherited_cost: None,
        }
    }

    fn pnl_match(id: i64, desk: &str, pnl_fiat: &str, pnl_usdt: &str, stage: Stage) -> PnlMatch {
        PnlMatch {
            id,
            cash_desk_id: CashDeskId::new(desk),
            currency: Asset::new("CZK"),
            open_lot_id: 1,
            close_tx_id: 1,
            fiat_used: d("100"),
            matched_usdt: d("4"),
            lot_rate: d("25"),
            sell_rate_eff: d("26"),
            pnl_fiat: d(pnl_fiat),
            pnl_usdt: d(pnl_usdt),
            cost_usdt_of_fiat_in: None,
            stage,
            created_at: TimeMs::new(id),
        }
    }

    #[test]
    fn test_compute_summary() {
        let lots = vec![
            lot(1, "a", "0", "20"),
            lot(2, "a", "300", "23"),
            lot(3, "a", "100", "22"),
        ];
        let matches = vec![
            pnl_match(1, "a", "15.217", "0.66", Stage::Direct),
            pnl_match(2, "a", "4.00", "0.17", Stage::Exchanged),
        ];
        let counts = TransactionCounts {
            buy_count: 3,
            sell_count: 2,
        };
        let view = ProfitSummary::compute(&Asset::new("CZK"), &lots, &matches, counts).view();

        assert_eq!(view.realized_profit.fiat, d("19.22"));
        assert_eq!(view.realized_profit.usdt, d("0.83"));
        assert_eq!(view.realized_by_stage.stage_2.fiat, d("4"));
        assert_eq!(view.remaining_lots.count, 2);
        assert_eq!(view.remaining_lots.total_value, d("400"));
        let rates = view.rates_info.unwrap();
        assert_eq!(rates.min_rate, d("22"));
        assert_eq!(rates.max_rate, d("23"));
        assert_eq!(rates.avg_rate, d("22.5"));
        assert_eq!(rates.weighted_avg_rate, d("22.75"));
        assert_eq!(view.transactions.buy_count, 3);
        assert_eq!(view.pnl_matches_count, 2);
    }

    #[test]
    fn test_no_open_lots_omits_rates() {
        let view = ProfitSummary::compute(
            &Asset::new("CZK"),
            &[lot(1, "a", "0", "20")],
            &[],
            TransactionCounts::default(),
        )
        .view();
        assert!(view.rates_info.is_none());
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("rates_info").is_none());
        assert_eq!(json["remaining_lots"]["count"], 0);
    }

    #[test]
    fn test_merge_equals_union() {
        let czk = Asset::new("CZK");
        let lots_a = vec![lot(1, "a", "300", "23"), lot(2, "a", "50", "21.5")];
        let lots_b = vec![lot(3, "b", "700", "24.1")];
        let matches_a = vec![pnl_match(1, "a", "10.01", "0.4", Stage::Direct)];
        let matches_b = vec![
            pnl_match(2, "b", "-3.33", "-0.13", Stage::Direct),
            pnl_match(3, "b", "1.5", "0.06", Stage::Exchanged),
        ];
        let counts_a = TransactionCounts {
            buy_count: 2,
            sell_count: 1,
        };
        let counts_b = TransactionCounts {
            buy_count: 1,
            sell_count: 2,
        };

        let a = ProfitSummary::compute(&czk, &lots_a, &matches_a, counts_a);
        let b = ProfitSummary::compute(&czk, &lots_b, &matches_b, counts_b);
        let merged = ProfitSummary::merge_all(&czk, [&a, &b]);

        let all_lots: Vec<FiatLot> = lots_a.into_iter().chain(lots_b).collect();
        let all_matches: Vec<PnlMatch> = matches_a.into_iter().chain(matches_b).collect();
        let union = ProfitSummary::compute(
            &czk,
            &all_lots,
            &all_matches,
            TransactionCounts {
                buy_count: 3,
                sell_count: 3,
            },
        );

        assert_eq!(merged, union);
        assert_eq!(merged.view(), union.view());
    }

    #[test]
    fn test_compute_is_idempotent() {
        let lots = vec![lot(1, "a", "300", "23")];
        let matches = vec![pnl_match(1, "a", "1", "0.04", Stage::Direct)];
        let czk = Asset::new("CZK");
        let first = ProfitSummary::compute(&czk, &lots, &matches, TransactionCounts::default());
        let second = ProfitSummary::compute(&czk, &lots, &matches, TransactionCounts::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_huge_open_lots_saturate_instead_of_panicking() {
        let huge = "70000000000000000000000000000";
        let lots = vec![lot(1, "a", huge, huge), lot(2, "b", huge, "2")];
        let summary =
            ProfitSummary::compute(&Asset::new("CZK"), &lots, &[], TransactionCounts::default());
        assert_eq!(summary.open_lot_count, 2);
        let view = summary.view();
        assert!(view.remaining_lots.total_value.is_positive());
        assert!(view.rates_info.is_some());
    }
}
