//! Replaying undo entries.
//!
//! Every mutating ledger operation stores the [`InverseAction`]s that take the
//! desk back to its previous state. Undo applies them in order inside one
//! write transaction.

use crate::db::repo::{cash, lots, matches, transactions};
use crate::domain::{Asset, CashDeskId, InverseAction, ReversalEntry, TimeMs};
use crate::error::LedgerError;
use sqlx::sqlite::SqliteConnection;

/// A fresh undo entry for `desk`.
pub fn new_entry(
    desk: &CashDeskId,
    description: String,
    currencies: Vec<Asset>,
    actions: Vec<InverseAction>,
    now: TimeMs,
) -> ReversalEntry {
    ReversalEntry {
        entry_id: uuid::Uuid::new_v4().to_string(),
        cash_desk_id: desk.clone(),
        description,
        currencies,
        actions,
        created_at: now,
    }
}

/// Apply inverse actions in order.
pub async fn apply_actions(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
    actions: &[InverseAction],
    now: TimeMs,
) -> Result<(), LedgerError> {
    for action in actions {
        apply_action(conn, desk, action, now).await?;
    }
    Ok(())
}

async fn apply_action(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
    action: &InverseAction,
    now: TimeMs,
) -> Result<(), LedgerError> {
    match action {
        InverseAction::RestoreLot { lot_id, amount } => {
            lots::restore_lot(conn, *lot_id, *amount).await?;
        }
        InverseAction::ConsumeLot { lot_id, amount } => {
            lots::decrement_lot(conn, *lot_id, *amount).await?;
        }
        InverseAction::DeleteLot { lot_id } => {
            delete_untouched_lot(conn, *lot_id).await?;
        }
        InverseAction::DeleteMatches { close_tx_id } => {
            matches::delete_matches_for_close(conn, *close_tx_id).await?;
        }
        InverseAction::DeleteTransaction { tx_id } => {
            if !transactions::delete_transaction(conn, *tx_id).await? {
                return Err(LedgerError::Conflict(format!(
                    "transaction {} no longer exists",
                    tx_id
                )));
            }
        }
        InverseAction::AdjustBalance { asset, delta } => {
            cash::adjust_balance(conn, desk, asset, *delta, now).await?;
        }
        InverseAction::RestoreNote {
            tx_id,
            note,
            is_modified,
        } => {
            if !transactions::set_note(conn, *tx_id, note, *is_modified).await? {
                return Err(LedgerError::Conflict(format!(
                    "transaction {} no longer exists",
                    tx_id
                )));
            }
        }
        InverseAction::ReinsertTransaction { transaction } => {
            transactions::reinsert_transaction(conn, transaction).await?;
        }
        InverseAction::ReinsertLot { lot } => {
            lots::reinsert_lot(conn, lot).await?;
        }
        InverseAction::ReinsertMatch { pnl_match } => {
            matches::reinsert_match(conn, pnl_match).await?;
        }
    }
    Ok(())
}

/// Delete a lot no match has drawn from.
pub async fn delete_untouched_lot(
    conn: &mut SqliteConnection,
    lot_id: i64,
) -> Result<(), LedgerError> {
    let lot = lots::get_lot(conn, lot_id)
        .await?
        .ok_or_else(|| LedgerError::Conflict(format!("lot {} no longer exists", lot_id)))?;
    if lot.remaining != lot.original_amount || matches::count_for_lot(conn, lot_id).await? > 0 {
        return Err(LedgerError::Conflict(format!(
            "lot {} has already been consumed ({} of {} left)",
            lot_id, lot.remaining, lot.original_amount
        )));
    }
    lots::delete_lot(conn, lot_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_repo;
    use crate::domain::{Decimal, LotSource, NewLot};

    fn czk_lot(amount: i64) -> NewLot {
        NewLot {
            cash_desk_id: CashDeskId::new("main"),
            currency: Asset::new("CZK"),
            amount: Decimal::from(amount),
            rate: Decimal::from(23),
            source: LotSource::Deposit,
            fee_percent: Decimal::zero(),
            origin_tx_id: None,
            inherited_cost: None,
        }
    }

    #[tokio::test]
    async fn test_restore_then_consume_round_trips_lot() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let desk = CashDeskId::new("main");
        let lot = lots::insert_lot(&mut conn, &czk_lot(1000), TimeMs::new(1))
            .await
            .unwrap();
        lots::decrement_lot(&mut conn, lot.id, Decimal::from(700))
            .await
            .unwrap();

        apply_actions(
            &mut conn,
            &desk,
            &[InverseAction::RestoreLot {
                lot_id: lot.id,
                amount: Decimal::from(700),
            }],
            TimeMs::new(2),
        )
        .await
        .unwrap();
        let restored = lots::get_lot(&mut conn, lot.id).await.unwrap().unwrap();
        assert_eq!(restored.remaining, Decimal::from(1000));

        let err = apply_actions(
            &mut conn,
            &desk,
            &[InverseAction::ConsumeLot {
                lot_id: lot.id,
                amount: Decimal::from(1001),
            }],
            TimeMs::new(3),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientLotBalance { .. }));
    }

    #[tokio::test]
    async fn test_delete_lot_refuses_consumed_lot() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let lot = lots::insert_lot(&mut conn, &czk_lot(100), TimeMs::new(1))
            .await
            .unwrap();
        lots::decrement_lot(&mut conn, lot.id, Decimal::from(1))
            .await
            .unwrap();

        let err = delete_untouched_lot(&mut conn, lot.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert!(lots::get_lot(&mut conn, lot.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_adjust_balance_action() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let desk = CashDeskId::new("main");

        apply_actions(
            &mut conn,
            &desk,
            &[
                InverseAction::AdjustBalance {
                    asset: Asset::usdt(),
                    delta: Decimal::from(5),
                },
                InverseAction::AdjustBalance {
                    asset: Asset::usdt(),
                    delta: Decimal::from(-2),
                },
            ],
            TimeMs::new(1),
        )
        .await
        .unwrap();

        assert_eq!(
            cash::balance(&mut conn, &desk, &Asset::usdt()).await.unwrap(),
            Decimal::from(3)
        );
    }
}
