//! Undo entries: the typed inverse of the last mutation on a desk.

use crate::domain::{Asset, CashDeskId, Decimal, FiatLot, PnlMatch, TimeMs, TransactionColumns};
use serde::{Deserialize, Serialize};

/// One step that reverts part of a committed operation.
///
/// Steps are applied in order. Each entry fully describes the rows it
/// recreates, so replaying never depends on data that may have been deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InverseAction {
    /// Give `amount` back to a lot that a match drew from.
    RestoreLot {
        lot_id: i64,
        #[serde(with = "crate::domain::decimal::text")]
        amount: Decimal,
    },
    /// Take `amount` from a lot again (undoes a restore).
    ConsumeLot {
        lot_id: i64,
        #[serde(with = "crate::domain::decimal::text")]
        amount: Decimal,
    },
    /// Remove a lot; it must still be untouched.
    DeleteLot { lot_id: i64 },
    DeleteMatches { close_tx_id: i64 },
    DeleteTransaction { tx_id: i64 },
    AdjustBalance {
        asset: Asset,
        #[serde(with = "crate::domain::decimal::text")]
        delta: Decimal,
    },
    /// Put back a note together with its modified flag.
    RestoreNote {
        tx_id: i64,
        note: String,
        is_modified: bool,
    },
    ReinsertTransaction { transaction: TransactionColumns },
    ReinsertLot { lot: FiatLot },
    ReinsertMatch { pnl_match: PnlMatch },
}

/// The single undo slot of a desk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalEntry {
    pub entry_id: String,
    pub cash_desk_id: CashDeskId,
    pub description: String,
    /// Lot currencies to lock while undoing.
    pub currencies: Vec<Asset>,
    pub actions: Vec<InverseAction>,
    pub created_at: TimeMs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_json_is_tagged() {
        let action = InverseAction::RestoreLot {
            lot_id: 4,
            amount: Decimal::from(700),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "restore_lot");
        assert_eq!(json["lot_id"], 4);
        assert_eq!(json["amount"], "700");

        let back: InverseAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }
}
