use axum::extract::{rejection::JsonRejection, Query, State};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::api::{AppState, DeskQuery};
use crate::domain::{Asset, Decimal};
use crate::error::AppError;
use crate::orchestration::{CashMovement, CashRequest};

#[derive(Debug, Serialize)]
pub struct CashMovementResponse {
    pub message: String,
    pub asset: Asset,
    pub amount: Decimal,
    pub old_balance: Decimal,
    pub new_balance: Decimal,
    pub note: String,
    pub transaction_id: i64,
}

impl CashMovementResponse {
    fn new(verb: &str, movement: CashMovement) -> Self {
        let kind = &movement.transaction.kind;
        let asset = kind.from_asset().clone();
        let amount = kind.amount_from();
        CashMovementResponse {
            message: format!("{} {} {}", verb, amount, asset),
            asset,
            amount,
            old_balance: movement.old_balance,
            new_balance: movement.new_balance,
            note: movement.transaction.note.clone(),
            transaction_id: movement.transaction.id,
        }
    }
}

pub async fn deposit(
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
    payload: Result<Json<CashRequest>, JsonRejection>,
) -> Result<Json<CashMovementResponse>, AppError> {
    let Json(request) = payload?;
    let desk = query.write_desk(&state);
    let movement = state.ledger.deposit(&desk, request).await?;
    Ok(Json(CashMovementResponse::new("Deposited", movement)))
}

pub async fn withdrawal(
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
    payload: Result<Json<CashRequest>, JsonRejection>,
) -> Result<Json<CashMovementResponse>, AppError> {
    let Json(request) = payload?;
    let desk = query.write_desk(&state);
    let movement = state.ledger.withdrawal(&desk, request).await?;
    Ok(Json(CashMovementResponse::new("Withdrawn", movement)))
}

#[derive(Debug, Serialize)]
pub struct CashStatusResponse {
    pub cash: BTreeMap<Asset, Decimal>,
}

pub async fn status(
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<CashStatusResponse>, AppError> {
    let cash = state
        .ledger
        .cash_status(query.read_scope().as_ref())
        .await?;
    Ok(Json(CashStatusResponse { cash }))
}

#[derive(Debug, Serialize)]
pub struct ProfitByCurrencyResponse {
    pub profits_by_currency: BTreeMap<Asset, Decimal>,
    pub message: String,
}

pub async fn profit(
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<ProfitByCurrencyResponse>, AppError> {
    let profits_by_currency = state
        .ledger
        .realized_profits(query.read_scope().as_ref())
        .await?;
    Ok(Json(ProfitByCurrencyResponse {
        profits_by_currency,
        message: "Realized profit grouped by profit currency".to_string(),
    }))
}
