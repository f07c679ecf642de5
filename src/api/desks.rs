use axum::extract::{rejection::JsonRejection, Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::views::CashDeskView;
use crate::api::AppState;
use crate::domain::CashDeskId;
use crate::error::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct ListDesksQuery {
    pub include_inactive: Option<bool>,
}

pub async fn list_desks(
    Query(query): Query<ListDesksQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<CashDeskView>>, AppError> {
    let desks = state
        .ledger
        .list_cash_desks(query.include_inactive.unwrap_or(false))
        .await?;
    Ok(Json(desks.iter().map(CashDeskView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct OpenDeskRequest {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

pub async fn open_desk(
    State(state): State<AppState>,
    payload: Result<Json<OpenDeskRequest>, JsonRejection>,
) -> Result<Json<CashDeskView>, AppError> {
    let Json(request) = payload?;
    let desk = state
        .ledger
        .open_cash_desk(&CashDeskId::new(request.id), &request.name)
        .await?;
    Ok(Json(CashDeskView::from(&desk)))
}

pub async fn get_desk(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CashDeskView>, AppError> {
    let desk = state.ledger.get_cash_desk(&CashDeskId::new(id)).await?;
    Ok(Json(CashDeskView::from(&desk)))
}

pub async fn deactivate_desk(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CashDeskView>, AppError> {
    let desk = state
        .ledger
        .deactivate_cash_desk(&CashDeskId::new(id))
        .await?;
    Ok(Json(CashDeskView::from(&desk)))
}
