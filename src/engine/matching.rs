//! FIFO matching of a closing amount against open fiat lots.
//!
//! The planner is pure: it reads a snapshot of lots and returns the per-lot
//! consumptions with their realized PnL. Persisting the plan (decrementing
//! lots, inserting matches) is the caller's job and must happen atomically.

use crate::domain::{fifo_cmp, Asset, Decimal, FiatLot, Stage};
use crate::engine::checked;
use crate::error::LedgerError;

/// How the consumed fiat is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePricing {
    /// Fiat paid out to a client selling crypto, at this many fiat per USDT.
    Sell { effective_rate: Decimal },
    /// Fiat given up in a fiat exchange. The USDT cost moves to the new lot,
    /// nothing is realized.
    CostTransfer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub currency: Asset,
    pub fiat_amount: Decimal,
    pub pricing: ClosePricing,
}

/// One lot drawn down by a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    pub lot_id: i64,
    /// Lot remaining before this consumption.
    pub lot_remaining: Decimal,
    pub fiat_used: Decimal,
    pub matched_usdt: Decimal,
    pub lot_rate: Decimal,
    pub sell_rate_eff: Decimal,
    pub pnl_fiat: Decimal,
    pub pnl_usdt: Decimal,
    pub cost_usdt_of_fiat_in: Option<Decimal>,
    pub stage: Stage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPlan {
    pub consumptions: Vec<Consumption>,
}

impl MatchPlan {
    pub fn is_empty(&self) -> bool {
        self.consumptions.is_empty()
    }

    pub fn total_fiat_used(&self) -> Decimal {
        self.consumptions.iter().map(|c| c.fiat_used).sum()
    }

    /// USDT cost basis of everything consumed.
    pub fn total_matched_usdt(&self) -> Decimal {
        self.consumptions.iter().map(|c| c.matched_usdt).sum()
    }

    pub fn total_pnl_fiat(&self) -> Decimal {
        self.consumptions.iter().map(|c| c.pnl_fiat).sum()
    }

    pub fn total_pnl_usdt(&self) -> Decimal {
        self.consumptions.iter().map(|c| c.pnl_usdt).sum()
    }
}

/// Plan a close against `lots`, oldest first.
///
/// Lots of other currencies and exhausted lots are skipped; the input does
/// not need to be sorted. Fails without side effects when the open lots
/// cannot cover `fiat_amount`.
pub fn plan_close(lots: &[FiatLot], request: &CloseRequest) -> Result<MatchPlan, LedgerError> {
    if request.fiat_amount.is_negative() {
        return Err(LedgerError::InvalidAmount(format!(
            "close amount must not be negative, got {}",
            request.fiat_amount
        )));
    }
    if let ClosePricing::Sell { effective_rate } = request.pricing {
        if !effective_rate.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "effective sell rate must be positive, got {}",
                effective_rate
            )));
        }
    }
    if request.fiat_amount.is_zero() {
        return Ok(MatchPlan::default());
    }

    let mut open: Vec<&FiatLot> = lots
        .iter()
        .filter(|l| l.currency == request.currency && l.remaining.is_positive())
        .collect();
    open.sort_by(|a, b| fifo_cmp(a, b));

    let available = checked::sum("available lots", open.iter().map(|l| l.remaining))?;
    if available < request.fiat_amount {
        return Err(LedgerError::InsufficientFiatLots {
            currency: request.currency.clone(),
            required: request.fiat_amount,
            available,
        });
    }

    let mut plan = MatchPlan::default();
    let mut need = request.fiat_amount;

    for lot in open {
        if !need.is_positive() {
            break;
        }
        if !lot.rate.is_positive() {
            return Err(LedgerError::Conflict(format!(
                "lot {} has a non-positive rate {}",
                lot.id, lot.rate
            )));
        }

        let take = if lot.remaining <= need {
            lot.remaining
        } else {
            need
        };
        let consumption = consume(lot, take, request.pricing)?;

        tracing::debug!(
            lot_id = lot.id,
            currency = %request.currency,
            fiat_used = %consumption.fiat_used,
            pnl_fiat = %consumption.pnl_fiat,
            "consumed lot"
        );

        plan.consumptions.push(consumption);
        need -= take;
    }

    // The plan's totals are plain sums over these same values.
    checked::sum("matched_usdt", plan.consumptions.iter().map(|c| c.matched_usdt))?;
    checked::sum("pnl_fiat", plan.consumptions.iter().map(|c| c.pnl_fiat))?;
    checked::sum("pnl_usdt", plan.consumptions.iter().map(|c| c.pnl_usdt))?;

    Ok(plan)
}

/// Price one consumption. Money fields are computed unrounded and rounded
/// once: fiat to 2 dp, USDT to 8 dp.
fn consume(
    lot: &FiatLot,
    take: Decimal,
    pricing: ClosePricing,
) -> Result<Consumption, LedgerError> {
    let sell_rate_eff = match pricing {
        ClosePricing::Sell { effective_rate } => effective_rate,
        ClosePricing::CostTransfer => lot.rate,
    };

    let matched_usdt = checked::div("matched_usdt", take, lot.rate)?;
    let spread = checked::sub("pnl_fiat", sell_rate_eff, lot.rate)?;
    let pnl_fiat = checked::div("pnl_fiat", checked::mul("pnl_fiat", take, spread)?, lot.rate)?;
    let markup = checked::sub(
        "pnl_usdt",
        checked::div("pnl_usdt", sell_rate_eff, lot.rate)?,
        Decimal::one(),
    )?;
    let pnl_usdt = checked::mul("pnl_usdt", matched_usdt, markup)?;

    let stage = lot.stage();
    let cost_usdt_of_fiat_in = match stage {
        Stage::Exchanged => lot.inherited_cost.map(|c| c.cost_usdt_of_fiat_in),
        Stage::Direct => None,
    };

    Ok(Consumption {
        lot_id: lot.id,
        lot_remaining: lot.remaining,
        fiat_used: take,
        matched_usdt: matched_usdt.round_crypto(),
        lot_rate: lot.rate,
        sell_rate_eff,
        pnl_fiat: pnl_fiat.round_fiat(),
        pnl_usdt: pnl_usdt.round_crypto(),
        cost_usdt_of_fiat_in,
        stage,
    })
}
