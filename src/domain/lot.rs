//! Fiat cost-basis lots.

use crate::domain::{Asset, CashDeskId, Decimal, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a lot's fiat entered the desk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotSource {
    /// Fiat received from a client buying crypto.
    FiatToCrypto,
    /// Fiat received as the destination leg of a fiat exchange.
    FiatToFiat,
    /// Fiat deposited manually at a known rate.
    Deposit,
}

impl LotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotSource::FiatToCrypto => "fiat_to_crypto",
            LotSource::FiatToFiat => "fiat_to_fiat",
            LotSource::Deposit => "deposit",
        }
    }

    /// Matching stage for lots of this source.
    pub fn stage(&self) -> Stage {
        match self {
            LotSource::FiatToCrypto | LotSource::Deposit => Stage::Direct,
            LotSource::FiatToFiat => Stage::Exchanged,
        }
    }
}

impl std::fmt::Display for LotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LotSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fiat_to_crypto" => Ok(LotSource::FiatToCrypto),
            "fiat_to_fiat" => Ok(LotSource::FiatToFiat),
            "deposit" => Ok(LotSource::Deposit),
            other => Err(format!("unknown lot source: {}", other)),
        }
    }
}

/// Lot provenance as recorded on a match.
///
/// Serialized as the integers 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Cost basis came straight from a rate (fiat->crypto purchase or deposit).
    Direct,
    /// Cost basis inherited in USDT through a fiat->fiat exchange.
    Exchanged,
}

impl Stage {
    pub fn as_i64(&self) -> i64 {
        match self {
            Stage::Direct => 1,
            Stage::Exchanged => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Stage::Direct),
            2 => Some(Stage::Exchanged),
            _ => None,
        }
    }
}

impl Serialize for Stage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Stage::from_i64(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid stage {}", value)))
    }
}

/// USDT cost basis inherited by a lot created from a fiat exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritedCost {
    /// Total USDT cost of the fiat that was given up.
    #[serde(with = "crate::domain::decimal::text")]
    pub cost_usdt_of_fiat_in: Decimal,
    /// Fiat received per USDT of inherited cost.
    #[serde(with = "crate::domain::decimal::text")]
    pub rate_usdt_of_fiat_in: Decimal,
}

/// A slice of fiat with a known acquisition rate, consumed FIFO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiatLot {
    pub id: i64,
    pub cash_desk_id: CashDeskId,
    pub currency: Asset,
    #[serde(with = "crate::domain::decimal::text")]
    pub original_amount: Decimal,
    #[serde(with = "crate::domain::decimal::text")]
    pub remaining: Decimal,
    /// Fiat per USDT at acquisition.
    #[serde(with = "crate::domain::decimal::text")]
    pub rate: Decimal,
    pub origin_tx_id: Option<i64>,
    pub created_at: TimeMs,
    pub source: LotSource,
    #[serde(with = "crate::domain::decimal::text")]
    pub fee_percent: Decimal,
    pub inherited_cost: Option<InheritedCost>,
}

impl FiatLot {
    pub fn is_exhausted(&self) -> bool {
        !self.remaining.is_positive()
    }

    /// Amount already drawn from this lot by matches.
    pub fn consumed(&self) -> Decimal {
        self.original_amount - self.remaining
    }

    pub fn stage(&self) -> Stage {
        self.source.stage()
    }
}

/// Parameters for a lot about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLot {
    pub cash_desk_id: CashDeskId,
    pub currency: Asset,
    pub amount: Decimal,
    pub rate: Decimal,
    pub source: LotSource,
    pub fee_percent: Decimal,
    pub origin_tx_id: Option<i64>,
    pub inherited_cost: Option<InheritedCost>,
}

/// Stable FIFO order: oldest first, ties broken by ascending id.
pub fn fifo_cmp(a: &FiatLot, b: &FiatLot) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(id: i64, created_at: i64) -> FiatLot {
        FiatLot {
            id,
            cash_desk_id: CashDeskId::new("main"),
            currency: Asset::new("CZK"),
            original_amount: Decimal::from(100),
            remaining: Decimal::from(100),
            rate: Decimal::from(23),
            origin_tx_id: None,
            created_at: TimeMs::new(created_at),
            source: LotSource::FiatToCrypto,
            fee_percent: Decimal::zero(),
            inherited_cost: None,
        }
    }

    #[test]
    fn test_fifo_cmp_orders_by_time_then_id() {
        let mut lots = vec![lot(3, 2000), lot(2, 1000), lot(1, 1000)];
        lots.sort_by(fifo_cmp);
        let ids: Vec<i64> = lots.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_source_stage() {
        assert_eq!(LotSource::FiatToCrypto.stage(), Stage::Direct);
        assert_eq!(LotSource::Deposit.stage(), Stage::Direct);
        assert_eq!(LotSource::FiatToFiat.stage(), Stage::Exchanged);
    }

    #[test]
    fn test_stage_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Stage::Exchanged).unwrap(), "2");
        let stage: Stage = serde_json::from_str("1").unwrap();
        assert_eq!(stage, Stage::Direct);
        assert!(serde_json::from_str::<Stage>("3").is_err());
    }

    #[test]
    fn test_lot_source_parse() {
        assert_eq!("fiat_to_fiat".parse::<LotSource>(), Ok(LotSource::FiatToFiat));
        assert!("bogus".parse::<LotSource>().is_err());
    }

    #[test]
    fn test_exhausted_and_consumed() {
        let mut l = lot(1, 0);
        l.remaining = Decimal::from(40);
        assert_eq!(l.consumed(), Decimal::from(60));
        assert!(!l.is_exhausted());
        l.remaining = Decimal::zero();
        assert!(l.is_exhausted());
    }
}
