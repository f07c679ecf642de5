pub mod cash;
pub mod desks;
pub mod health;
pub mod transactions;
pub mod undo;
pub mod views;

use crate::domain::CashDeskId;
use crate::error::AppError;
use crate::orchestration::Ledger;
use axum::{
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

/// `?cash_desk_id=` on every desk-scoped route.
#[derive(Debug, Default, Deserialize)]
pub struct DeskQuery {
    pub cash_desk_id: Option<String>,
}

impl DeskQuery {
    /// Desk for reads; `None` selects the aggregate view.
    pub fn read_scope(&self) -> Option<CashDeskId> {
        self.cash_desk_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(CashDeskId::new)
    }

    /// Desk for writes; falls back to the configured default desk.
    pub fn write_desk(&self, state: &AppState) -> CashDeskId {
        self.read_scope().unwrap_or_else(|| {
            CashDeskId::new(state.ledger.config().default_cash_desk_id.clone())
        })
    }
}

pub(crate) fn parse_tx_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .map_err(|_| AppError::BadRequest(format!("Invalid transaction ID: {}", raw)))
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/transactions",
            get(transactions::list_transactions).post(transactions::create_transaction),
        )
        .route("/transactions/fiat-lots", get(transactions::list_lots))
        .route(
            "/transactions/fiat-lots/:currency",
            get(transactions::list_lots_for_currency),
        )
        .route("/transactions/pnl-matches", get(transactions::list_matches))
        .route(
            "/transactions/profit-summary/:currency",
            get(transactions::profit_summary),
        )
        .route(
            "/transactions/:id",
            get(transactions::get_transaction)
                .put(transactions::update_transaction)
                .delete(transactions::delete_transaction),
        )
        .route("/cash/deposit", post(cash::deposit))
        .route("/cash/withdrawal", post(cash::withdrawal))
        .route("/cash/status", get(cash::status))
        .route("/cash/profit", get(cash::profit))
        .route("/undo", post(undo::undo))
        .route("/cash-desks", get(desks::list_desks).post(desks::open_desk))
        .route(
            "/cash-desks/:id",
            get(desks::get_desk).delete(desks::deactivate_desk),
        )
        .layer(cors)
        .with_state(state)
}
