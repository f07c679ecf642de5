//! The ledger service: every mutation of a cash desk goes through here.
//!
//! A mutation takes the (desk, currency) locks it needs, opens one
//! `BEGIN IMMEDIATE` transaction, reads lots and balances inside it, writes
//! the transaction, matches, lot and balance changes together with the desk's
//! undo entry, and commits. Any error rolls the whole unit back.

use crate::config::Config;
use crate::db::repo::{cash, desks, lots, matches, reversal as undo_log, transactions, WriteTx};
use crate::db::Repository;
use crate::domain::{
    Asset, CashDesk, CashDeskId, Decimal, DeskScope, FiatLot, InverseAction, LotSource, NewLot,
    PnlMatch, ReversalEntry, TimeMs, Transaction, TransactionColumns, TransactionKind,
    TransactionType,
};
use crate::engine::pricing::{cash_amount, deposit_lot_rate};
use crate::engine::{
    plan_close, price_exchange, DeskLocks, ExchangeRequest, MatchPlan, PricedExchange,
    ProfitSummary,
};
use crate::error::LedgerError;
use crate::orchestration::reversal;
use futures::future::try_join_all;
use serde::Deserialize;
use sqlx::sqlite::SqliteConnection;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Body of a deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CashRequest {
    pub asset: Asset,
    pub amount: Decimal,
    /// Acquisition rate in the asset's quoting convention; required for fiat deposits.
    #[serde(default)]
    pub rate: Option<Decimal>,
    #[serde(default)]
    pub note: String,
}

/// A committed deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashMovement {
    pub transaction: Transaction,
    pub old_balance: Decimal,
    pub new_balance: Decimal,
}

pub struct Ledger {
    repo: Repository,
    config: Config,
    locks: DeskLocks,
}

impl Ledger {
    pub fn new(repo: Repository, config: Config) -> Self {
        let locks = DeskLocks::new(Duration::from_millis(config.lock_timeout_ms));
        Self {
            repo,
            config,
            locks,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    // ---- cash desks ----

    /// Create the configured default desk if it is missing.
    pub async fn ensure_default_desk(&self) -> Result<CashDesk, LedgerError> {
        let id = CashDeskId::new(self.config.default_cash_desk_id.clone());
        let mut conn = self.repo.conn().await?;
        if desks::ensure_cash_desk(&mut conn, &id, &self.config.tenant_id, "Main", TimeMs::now())
            .await?
        {
            info!(
                cash_desk_id = %id,
                tenant_id = %self.config.tenant_id,
                "default cash desk created"
            );
        }
        desks::get_cash_desk(&mut conn, &id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("cash desk {}", id)))
    }

    pub async fn open_cash_desk(
        &self,
        id: &CashDeskId,
        name: &str,
    ) -> Result<CashDesk, LedgerError> {
        if id.as_str().trim().is_empty() || id.as_str() != id.as_str().trim() {
            return Err(LedgerError::InvalidInput(format!(
                "invalid cash desk id {:?}",
                id.as_str()
            )));
        }
        let name = if name.trim().is_empty() {
            id.as_str()
        } else {
            name.trim()
        };

        let mut conn = self.repo.conn().await?;
        let created =
            desks::ensure_cash_desk(&mut conn, id, &self.config.tenant_id, name, TimeMs::now())
                .await?;
        let desk = desks::get_cash_desk(&mut conn, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("cash desk {}", id)))?;
        if desk.tenant_id != self.config.tenant_id || !desk.is_active {
            return Err(LedgerError::Conflict(format!(
                "cash desk {} already exists and cannot be reopened",
                id
            )));
        }
        if created {
            info!(cash_desk_id = %id, name = %desk.name, "cash desk opened");
        }
        Ok(desk)
    }

    pub async fn list_cash_desks(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<CashDesk>, LedgerError> {
        let mut conn = self.repo.conn().await?;
        Ok(desks::list_cash_desks(&mut conn, &self.config.tenant_id, include_inactive).await?)
    }

    pub async fn get_cash_desk(&self, id: &CashDeskId) -> Result<CashDesk, LedgerError> {
        let mut conn = self.repo.conn().await?;
        desks::get_cash_desk(&mut conn, id)
            .await?
            .filter(|d| d.tenant_id == self.config.tenant_id)
            .ok_or_else(|| LedgerError::NotFound(format!("cash desk {}", id)))
    }

    /// Soft-delete a desk. Its history stays readable; it accepts no more mutations.
    pub async fn deactivate_cash_desk(&self, id: &CashDeskId) -> Result<CashDesk, LedgerError> {
        if id.as_str() == self.config.default_cash_desk_id {
            return Err(LedgerError::Conflict(
                "the default cash desk cannot be deactivated".to_string(),
            ));
        }
        self.get_cash_desk(id).await?;

        let mut conn = self.repo.conn().await?;
        if !desks::deactivate_cash_desk(&mut conn, id, TimeMs::now()).await? {
            return Err(LedgerError::NotFound(format!("active cash desk {}", id)));
        }
        info!(cash_desk_id = %id, "cash desk deactivated");
        self.get_cash_desk(id).await
    }

    // ---- mutations ----

    /// Record an exchange, or route a deposit/withdrawal request to the cash operations.
    pub async fn create_transaction(
        &self,
        desk: &CashDeskId,
        request: ExchangeRequest,
    ) -> Result<Transaction, LedgerError> {
        match request.tx_type {
            TransactionType::Deposit | TransactionType::Withdrawal => {
                let cash_request = CashRequest {
                    asset: request.from_asset,
                    amount: request.amount_from,
                    rate: Some(request.rate_used).filter(|r| !r.is_zero()),
                    note: request.note,
                };
                let movement = if request.tx_type == TransactionType::Deposit {
                    self.deposit(desk, cash_request).await?
                } else {
                    self.withdrawal(desk, cash_request).await?
                };
                return Ok(movement.transaction);
            }
            _ => {}
        }

        let priced = price_exchange(&request, &self.config)?;
        let _guard = self.locks.acquire(desk, &priced.lot_currencies()).await?;
        let now = TimeMs::now();

        let mut tx = self.repo.begin_write().await?;
        let result = self
            .write_exchange(tx.conn()?, desk, priced, &request.note, now)
            .await;
        let (transaction, match_count) = finish(tx, result, "create_transaction", desk).await?;

        info!(
            cash_desk_id = %desk,
            tx_id = transaction.id,
            tx_type = %transaction.kind.tx_type(),
            matches = match_count,
            "transaction recorded"
        );
        Ok(transaction)
    }

    async fn write_exchange(
        &self,
        conn: &mut SqliteConnection,
        desk: &CashDeskId,
        priced: PricedExchange,
        note: &str,
        now: TimeMs,
    ) -> Result<(Transaction, usize), LedgerError> {
        self.require_active_desk(conn, desk).await?;

        let (payout_asset, payout_amount) = priced.payout();
        require_cash(conn, desk, payout_asset, payout_amount).await?;

        let close = priced.close_request();
        let plan = match &close {
            Some(request) => {
                let open = lots::open_lots(conn, desk, &request.currency).await?;
                plan_close(&open, request)?
            }
            None => MatchPlan::default(),
        };

        let settlement = priced.settle(desk, &plan)?;
        let deltas = settlement.kind.cash_deltas();
        let transaction =
            transactions::insert_transaction(conn, desk, settlement.kind, note, now).await?;

        let mut inverse = Vec::new();
        if let Some(request) = &close {
            for consumption in &plan.consumptions {
                lots::decrement_lot(conn, consumption.lot_id, consumption.fiat_used).await?;
                matches::insert_match(
                    conn,
                    desk,
                    &request.currency,
                    transaction.id,
                    consumption,
                    now,
                )
                .await?;
                inverse.push(InverseAction::RestoreLot {
                    lot_id: consumption.lot_id,
                    amount: consumption.fiat_used,
                });
            }
            if !plan.is_empty() {
                inverse.push(InverseAction::DeleteMatches {
                    close_tx_id: transaction.id,
                });
            }
        }

        if let Some(mut new_lot) = settlement.lot {
            new_lot.origin_tx_id = Some(transaction.id);
            let lot = lots::insert_lot(conn, &new_lot, now).await?;
            inverse.push(InverseAction::DeleteLot { lot_id: lot.id });
        }

        inverse.extend(apply_cash_deltas(conn, desk, &deltas, now).await?);
        inverse.push(InverseAction::DeleteTransaction {
            tx_id: transaction.id,
        });

        let entry = reversal::new_entry(
            desk,
            describe(&transaction),
            transaction.kind.lock_currencies(),
            inverse,
            now,
        );
        undo_log::put_entry(conn, &entry).await?;

        Ok((transaction, plan.consumptions.len()))
    }

    /// Add cash to a desk. Fiat deposits open a lot at the given rate.
    pub async fn deposit(
        &self,
        desk: &CashDeskId,
        request: CashRequest,
    ) -> Result<CashMovement, LedgerError> {
        let asset = request.asset.clone();
        let amount = cash_amount(&self.config, &asset, request.amount)?;
        let lot_rate = if self.config.is_fiat(&asset) {
            let rate = request.rate.ok_or_else(|| {
                LedgerError::InvalidAmount(format!("rate is required for {} deposits", asset))
            })?;
            Some(deposit_lot_rate(&self.config, &asset, rate)?)
        } else {
            None
        };
        let rate = request.rate.filter(|r| r.is_positive());

        let _guard = self.locks.acquire(desk, std::slice::from_ref(&asset)).await?;
        let now = TimeMs::now();

        let mut tx = self.repo.begin_write().await?;
        let result = self
            .write_deposit(tx.conn()?, desk, asset, amount, rate, lot_rate, &request.note, now)
            .await;
        let movement = finish(tx, result, "deposit", desk).await?;

        info!(
            cash_desk_id = %desk,
            tx_id = movement.transaction.id,
            asset = %movement.transaction.kind.from_asset(),
            amount = %amount,
            opened_lot = lot_rate.is_some(),
            "deposit recorded"
        );
        Ok(movement)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_deposit(
        &self,
        conn: &mut SqliteConnection,
        desk: &CashDeskId,
        asset: Asset,
        amount: Decimal,
        rate: Option<Decimal>,
        lot_rate: Option<Decimal>,
        note: &str,
        now: TimeMs,
    ) -> Result<CashMovement, LedgerError> {
        self.require_active_desk(conn, desk).await?;
        let old_balance = cash::balance(conn, desk, &asset).await?;

        let kind = TransactionKind::Deposit {
            asset: asset.clone(),
            amount,
            rate,
        };
        let deltas = kind.cash_deltas();
        let transaction = transactions::insert_transaction(conn, desk, kind, note, now).await?;

        let mut inverse = Vec::new();
        if let Some(lot_rate) = lot_rate {
            let lot = lots::insert_lot(
                conn,
                &NewLot {
                    cash_desk_id: desk.clone(),
                    currency: asset.clone(),
                    amount,
                    rate: lot_rate,
                    source: LotSource::Deposit,
                    fee_percent: Decimal::zero(),
                    origin_tx_id: Some(transaction.id),
                    inherited_cost: None,
                },
                now,
            )
            .await?;
            inverse.push(InverseAction::DeleteLot { lot_id: lot.id });
        }
        inverse.extend(apply_cash_deltas(conn, desk, &deltas, now).await?);
        inverse.push(InverseAction::DeleteTransaction {
            tx_id: transaction.id,
        });
        let new_balance = cash::balance(conn, desk, &asset).await?;

        let entry = reversal::new_entry(desk, describe(&transaction), vec![asset], inverse, now);
        undo_log::put_entry(conn, &entry).await?;

        Ok(CashMovement {
            transaction,
            old_balance,
            new_balance,
        })
    }

    /// Take cash out of a desk. Lots are left alone.
    pub async fn withdrawal(
        &self,
        desk: &CashDeskId,
        request: CashRequest,
    ) -> Result<CashMovement, LedgerError> {
        let asset = request.asset.clone();
        let amount = cash_amount(&self.config, &asset, request.amount)?;

        let _guard = self.locks.acquire(desk, std::slice::from_ref(&asset)).await?;
        let now = TimeMs::now();

        let mut tx = self.repo.begin_write().await?;
        let result = self
            .write_withdrawal(tx.conn()?, desk, asset, amount, &request.note, now)
            .await;
        let movement = finish(tx, result, "withdrawal", desk).await?;

        info!(
            cash_desk_id = %desk,
            tx_id = movement.transaction.id,
            asset = %movement.transaction.kind.from_asset(),
            amount = %amount,
            "withdrawal recorded"
        );
        Ok(movement)
    }

    async fn write_withdrawal(
        &self,
        conn: &mut SqliteConnection,
        desk: &CashDeskId,
        asset: Asset,
        amount: Decimal,
        note: &str,
        now: TimeMs,
    ) -> Result<CashMovement, LedgerError> {
        self.require_active_desk(conn, desk).await?;
        let old_balance = require_cash(conn, desk, &asset, amount).await?;

        let kind = TransactionKind::Withdrawal {
            asset: asset.clone(),
            amount,
        };
        let deltas = kind.cash_deltas();
        let transaction = transactions::insert_transaction(conn, desk, kind, note, now).await?;

        let mut inverse = apply_cash_deltas(conn, desk, &deltas, now).await?;
        inverse.push(InverseAction::DeleteTransaction {
            tx_id: transaction.id,
        });
        let new_balance = cash::balance(conn, desk, &asset).await?;

        let entry = reversal::new_entry(desk, describe(&transaction), vec![asset], inverse, now);
        undo_log::put_entry(conn, &entry).await?;

        Ok(CashMovement {
            transaction,
            old_balance,
            new_balance,
        })
    }

    /// Delete a transaction and everything it caused: its matches give their
    /// fiat back to the lots they drew from, its lot (if untouched) goes away
    /// and its balance changes are reversed. The deletion itself can be undone.
    pub async fn delete_transaction(
        &self,
        desk: &CashDeskId,
        tx_id: i64,
    ) -> Result<Transaction, LedgerError> {
        let existing = self.get_transaction(Some(desk), tx_id).await?;
        let _guard = self
            .locks
            .acquire(desk, &existing.kind.lock_currencies())
            .await?;
        let now = TimeMs::now();

        let mut tx = self.repo.begin_write().await?;
        let result = self.write_delete(tx.conn()?, desk, tx_id, now).await;
        let (deleted, restored) = finish(tx, result, "delete_transaction", desk).await?;

        info!(
            cash_desk_id = %desk,
            tx_id,
            tx_type = %deleted.kind.tx_type(),
            restored_matches = restored,
            "transaction deleted"
        );
        Ok(deleted)
    }

    async fn write_delete(
        &self,
        conn: &mut SqliteConnection,
        desk: &CashDeskId,
        tx_id: i64,
        now: TimeMs,
    ) -> Result<(Transaction, usize), LedgerError> {
        self.require_active_desk(conn, desk).await?;
        let target = transactions::get_transaction(conn, tx_id)
            .await?
            .filter(|t| &t.cash_desk_id == desk)
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", tx_id)))?;
        let consumed = matches::matches_for_close(conn, tx_id).await?;
        let created = lots::lot_for_origin(conn, tx_id).await?;

        let mut redo = vec![InverseAction::ReinsertTransaction {
            transaction: TransactionColumns::from(&target),
        }];

        if let Some(lot) = created {
            reversal::delete_untouched_lot(conn, lot.id).await?;
            redo.push(InverseAction::ReinsertLot { lot });
        }

        for m in &consumed {
            lots::restore_lot(conn, m.open_lot_id, m.fiat_used).await?;
            redo.push(InverseAction::ConsumeLot {
                lot_id: m.open_lot_id,
                amount: m.fiat_used,
            });
        }
        matches::delete_matches_for_close(conn, tx_id).await?;
        redo.extend(consumed.iter().map(|m| InverseAction::ReinsertMatch {
            pnl_match: m.clone(),
        }));

        let reversed: Vec<(Asset, Decimal)> = target
            .kind
            .cash_deltas()
            .into_iter()
            .map(|(asset, delta)| (asset, -delta))
            .collect();
        redo.extend(apply_cash_deltas(conn, desk, &reversed, now).await?);

        transactions::delete_transaction(conn, tx_id).await?;

        let entry = reversal::new_entry(
            desk,
            format!("delete {}", describe(&target)),
            target.kind.lock_currencies(),
            redo,
            now,
        );
        undo_log::put_entry(conn, &entry).await?;

        Ok((target, consumed.len()))
    }

    /// Replace a transaction's note. Marks the transaction modified.
    pub async fn update_note(
        &self,
        desk: &CashDeskId,
        tx_id: i64,
        note: &str,
    ) -> Result<Transaction, LedgerError> {
        let now = TimeMs::now();
        let mut tx = self.repo.begin_write().await?;
        let result = self.write_note(tx.conn()?, desk, tx_id, note, now).await;
        let updated = finish(tx, result, "update_note", desk).await?;

        info!(cash_desk_id = %desk, tx_id, "transaction note updated");
        Ok(updated)
    }

    async fn write_note(
        &self,
        conn: &mut SqliteConnection,
        desk: &CashDeskId,
        tx_id: i64,
        note: &str,
        now: TimeMs,
    ) -> Result<Transaction, LedgerError> {
        self.require_active_desk(conn, desk).await?;
        let mut target = transactions::get_transaction(conn, tx_id)
            .await?
            .filter(|t| &t.cash_desk_id == desk)
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", tx_id)))?;

        transactions::set_note(conn, tx_id, note, true).await?;

        let entry = reversal::new_entry(
            desk,
            format!("note on transaction #{}", tx_id),
            Vec::new(),
            vec![InverseAction::RestoreNote {
                tx_id,
                note: target.note.clone(),
                is_modified: target.is_modified,
            }],
            now,
        );
        undo_log::put_entry(conn, &entry).await?;

        target.note = note.to_string();
        target.is_modified = true;
        Ok(target)
    }

    /// Revert the desk's most recent mutation. Returns its description.
    pub async fn undo(&self, desk: &CashDeskId) -> Result<String, LedgerError> {
        let peeked = {
            let mut conn = self.repo.conn().await?;
            undo_log::get_entry(&mut conn, desk).await?
        }
        .ok_or(LedgerError::NothingToUndo)?;

        let _guard = self.locks.acquire(desk, &peeked.currencies).await?;
        let now = TimeMs::now();

        let mut tx = self.repo.begin_write().await?;
        let result = self.write_undo(tx.conn()?, desk, &peeked.entry_id, now).await;
        let entry = finish(tx, result, "undo", desk).await?;

        info!(
            cash_desk_id = %desk,
            entry_id = %entry.entry_id,
            actions = entry.actions.len(),
            description = %entry.description,
            "operation undone"
        );
        Ok(entry.description)
    }

    async fn write_undo(
        &self,
        conn: &mut SqliteConnection,
        desk: &CashDeskId,
        entry_id: &str,
        now: TimeMs,
    ) -> Result<ReversalEntry, LedgerError> {
        self.require_active_desk(conn, desk).await?;
        let entry = undo_log::get_entry(conn, desk)
            .await?
            .ok_or(LedgerError::NothingToUndo)?;
        if entry.entry_id != entry_id {
            return Err(LedgerError::ConcurrentModification(format!(
                "cash desk {} changed while preparing undo, try again",
                desk
            )));
        }

        reversal::apply_actions(conn, desk, &entry.actions, now).await?;
        undo_log::delete_entry(conn, desk).await?;
        Ok(entry)
    }

    // ---- reads ----

    /// Read scope: one desk, or every active desk of the tenant when `None`.
    pub async fn scope(&self, desk: Option<&CashDeskId>) -> Result<DeskScope, LedgerError> {
        match desk {
            Some(id) => {
                self.get_cash_desk(id).await?;
                Ok(DeskScope::Desk(id.clone()))
            }
            None => Ok(DeskScope::Tenant(self.config.tenant_id.clone())),
        }
    }

    pub async fn list_transactions(
        &self,
        desk: Option<&CashDeskId>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let scope = self.scope(desk).await?;
        let mut conn = self.repo.conn().await?;
        Ok(transactions::list_transactions(&mut conn, &scope).await?)
    }

    pub async fn get_transaction(
        &self,
        desk: Option<&CashDeskId>,
        tx_id: i64,
    ) -> Result<Transaction, LedgerError> {
        let found = {
            let mut conn = self.repo.conn().await?;
            transactions::get_transaction(&mut conn, tx_id).await?
        };
        let not_found = || LedgerError::NotFound(format!("transaction {}", tx_id));
        let transaction = found.ok_or_else(not_found)?;

        match desk {
            Some(id) if &transaction.cash_desk_id != id => Err(not_found()),
            Some(_) => Ok(transaction),
            None => {
                self.get_cash_desk(&transaction.cash_desk_id)
                    .await
                    .map_err(|_| not_found())?;
                Ok(transaction)
            }
        }
    }

    pub async fn list_lots(
        &self,
        desk: Option<&CashDeskId>,
        currency: Option<&Asset>,
    ) -> Result<Vec<FiatLot>, LedgerError> {
        let scope = self.scope(desk).await?;
        let mut conn = self.repo.conn().await?;
        Ok(lots::list_lots(&mut conn, &scope, currency).await?)
    }

    pub async fn list_matches(
        &self,
        desk: Option<&CashDeskId>,
        currency: Option<&Asset>,
    ) -> Result<Vec<PnlMatch>, LedgerError> {
        let scope = self.scope(desk).await?;
        let mut conn = self.repo.conn().await?;
        Ok(matches::list_matches(&mut conn, &scope, currency).await?)
    }

    /// Realized profit and open-lot statistics for one currency.
    ///
    /// Without a desk, summaries of every active desk are computed
    /// independently and merged.
    pub async fn profit_summary(
        &self,
        desk: Option<&CashDeskId>,
        currency: &Asset,
    ) -> Result<ProfitSummary, LedgerError> {
        if let Some(id) = desk {
            self.get_cash_desk(id).await?;
            return self.desk_summary(id, currency).await;
        }

        let active = self.list_cash_desks(false).await?;
        let parts = try_join_all(active.iter().map(|d| self.desk_summary(&d.id, currency))).await?;
        Ok(ProfitSummary::merge_all(currency, &parts))
    }

    async fn desk_summary(
        &self,
        desk: &CashDeskId,
        currency: &Asset,
    ) -> Result<ProfitSummary, LedgerError> {
        let scope = DeskScope::Desk(desk.clone());
        let mut conn = self.repo.conn().await?;
        let desk_lots = lots::list_lots(&mut conn, &scope, Some(currency)).await?;
        let desk_matches = matches::list_matches(&mut conn, &scope, Some(currency)).await?;
        let counts = transactions::count_for_currency(&mut conn, &scope, currency).await?;
        Ok(ProfitSummary::compute(
            currency,
            &desk_lots,
            &desk_matches,
            counts,
        ))
    }

    pub async fn cash_status(
        &self,
        desk: Option<&CashDeskId>,
    ) -> Result<BTreeMap<Asset, Decimal>, LedgerError> {
        let scope = self.scope(desk).await?;
        let mut conn = self.repo.conn().await?;
        Ok(cash::balances(&mut conn, &scope).await?)
    }

    /// Stored transaction profit per fiat profit currency, rounded to fiat precision.
    ///
    /// A currency appears once any transaction reports profit in it, even at zero.
    pub async fn realized_profits(
        &self,
        desk: Option<&CashDeskId>,
    ) -> Result<BTreeMap<Asset, Decimal>, LedgerError> {
        let txs = self.list_transactions(desk).await?;
        let mut totals: BTreeMap<Asset, Decimal> = BTreeMap::new();
        for tx in &txs {
            let Some(currency) = tx.kind.profit_currency() else {
                continue;
            };
            if !self.config.is_fiat(&currency) {
                continue;
            }
            let total = totals.entry(currency).or_insert_with(Decimal::zero);
            *total = total.saturating_add(tx.kind.profit());
        }
        Ok(totals
            .into_iter()
            .map(|(currency, total)| (currency, total.round_fiat()))
            .collect())
    }

    async fn require_active_desk(
        &self,
        conn: &mut SqliteConnection,
        desk: &CashDeskId,
    ) -> Result<CashDesk, LedgerError> {
        desks::get_cash_desk(conn, desk)
            .await?
            .filter(|d| d.is_active && d.tenant_id == self.config.tenant_id)
            .ok_or_else(|| LedgerError::NotFound(format!("active cash desk {}", desk)))
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: WriteTx,
    result: Result<T, LedgerError>,
    operation: &'static str,
    desk: &CashDeskId,
) -> Result<T, LedgerError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            warn!(cash_desk_id = %desk, operation, error = %err, "operation rolled back");
            if let Err(e) = tx.rollback().await {
                warn!(cash_desk_id = %desk, operation, error = %e, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Fail with `InsufficientCashBalance` unless the desk holds `required`.
/// Returns the current balance.
async fn require_cash(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
    asset: &Asset,
    required: Decimal,
) -> Result<Decimal, LedgerError> {
    let available = cash::balance(conn, desk, asset).await?;
    if available < required {
        return Err(LedgerError::InsufficientCashBalance {
            asset: asset.clone(),
            required,
            available,
        });
    }
    Ok(available)
}

/// Apply balance changes, refusing any that would overdraw. Returns their inverses.
async fn apply_cash_deltas(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
    deltas: &[(Asset, Decimal)],
    now: TimeMs,
) -> Result<Vec<InverseAction>, LedgerError> {
    let mut inverse = Vec::with_capacity(deltas.len());
    for (asset, delta) in deltas {
        if delta.is_negative() {
            require_cash(conn, desk, asset, -*delta).await?;
        }
        cash::adjust_balance(conn, desk, asset, *delta, now).await?;
        inverse.push(InverseAction::AdjustBalance {
            asset: asset.clone(),
            delta: -*delta,
        });
    }
    Ok(inverse)
}

/// Operator-facing one-liner, shown when the operation is undone.
fn describe(tx: &Transaction) -> String {
    let kind = &tx.kind;
    match kind.to_asset() {
        Some(to) => format!(
            "{} #{}: {} {} -> {} {}",
            kind.tx_type(),
            tx.id,
            kind.amount_from(),
            kind.from_asset(),
            kind.amount_to_final(),
            to
        ),
        None => format!(
            "{} #{}: {} {}",
            kind.tx_type(),
            tx.id,
            kind.amount_from(),
            kind.from_asset()
        ),
    }
}
