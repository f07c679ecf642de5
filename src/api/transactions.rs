use axum::extract::{rejection::JsonRejection, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::views::{LotView, MatchView, TransactionView};
use crate::api::{parse_tx_id, AppState, DeskQuery};
use crate::domain::{Asset, Decimal};
use crate::engine::{ExchangeRequest, ProfitSummaryView};
use crate::error::AppError;

pub async fn list_transactions(
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<TransactionView>>, AppError> {
    let txs = state
        .ledger
        .list_transactions(query.read_scope().as_ref())
        .await?;
    Ok(Json(txs.iter().map(TransactionView::from).collect()))
}

pub async fn create_transaction(
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
    payload: Result<Json<ExchangeRequest>, JsonRejection>,
) -> Result<Json<TransactionView>, AppError> {
    let Json(request) = payload?;
    let desk = query.write_desk(&state);
    let tx = state.ledger.create_transaction(&desk, request).await?;
    Ok(Json(TransactionView::from(&tx)))
}

pub async fn get_transaction(
    Path(id): Path<String>,
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<TransactionView>, AppError> {
    let tx_id = parse_tx_id(&id)?;
    let tx = state
        .ledger
        .get_transaction(query.read_scope().as_ref(), tx_id)
        .await?;
    Ok(Json(TransactionView::from(&tx)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTransactionRequest {
    pub note: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateTransactionResponse {
    pub message: String,
    pub transaction: TransactionView,
}

pub async fn update_transaction(
    Path(id): Path<String>,
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
    payload: Result<Json<UpdateTransactionRequest>, JsonRejection>,
) -> Result<Json<UpdateTransactionResponse>, AppError> {
    let Json(request) = payload?;
    let tx_id = parse_tx_id(&id)?;
    let desk = query.write_desk(&state);
    let tx = state
        .ledger
        .update_note(&desk, tx_id, &request.note)
        .await?;
    Ok(Json(UpdateTransactionResponse {
        message: "Transaction updated successfully".to_string(),
        transaction: TransactionView::from(&tx),
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteTransactionResponse {
    pub message: String,
    pub deleted_id: i64,
}

pub async fn delete_transaction(
    Path(id): Path<String>,
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<DeleteTransactionResponse>, AppError> {
    let tx_id = parse_tx_id(&id)?;
    let desk = query.write_desk(&state);
    let deleted = state.ledger.delete_transaction(&desk, tx_id).await?;
    Ok(Json(DeleteTransactionResponse {
        message: "Transaction deleted successfully".to_string(),
        deleted_id: deleted.id,
    }))
}

#[derive(Debug, Serialize)]
pub struct LotsResponse {
    pub lots: Vec<LotView>,
}

pub async fn list_lots(
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<LotsResponse>, AppError> {
    let lots = state
        .ledger
        .list_lots(query.read_scope().as_ref(), None)
        .await?;
    Ok(Json(LotsResponse {
        lots: lots.iter().map(LotView::from).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct CurrencyLotsResponse {
    pub currency: Asset,
    pub lots: Vec<LotView>,
    pub total_remaining: Decimal,
}

pub async fn list_lots_for_currency(
    Path(currency): Path<String>,
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<CurrencyLotsResponse>, AppError> {
    let currency = Asset::new(currency);
    let lots = state
        .ledger
        .list_lots(query.read_scope().as_ref(), Some(&currency))
        .await?;
    let total_remaining = lots.iter().map(|l| l.remaining).sum();

    Ok(Json(CurrencyLotsResponse {
        currency,
        lots: lots.iter().map(LotView::from).collect(),
        total_remaining,
    }))
}

#[derive(Debug, Serialize)]
pub struct MatchesResponse {
    pub matches: Vec<MatchView>,
}

pub async fn list_matches(
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<MatchesResponse>, AppError> {
    let matches = state
        .ledger
        .list_matches(query.read_scope().as_ref(), None)
        .await?;
    Ok(Json(MatchesResponse {
        matches: matches.iter().map(MatchView::from).collect(),
    }))
}

pub async fn profit_summary(
    Path(currency): Path<String>,
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<ProfitSummaryView>, AppError> {
    let currency = Asset::new(currency);
    if currency.is_empty() {
        return Err(AppError::BadRequest("currency is required".to_string()));
    }
    let summary = state
        .ledger
        .profit_summary(query.read_scope().as_ref(), &currency)
        .await?;
    Ok(Json(summary.view()))
}
