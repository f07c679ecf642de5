use crate::domain::{Asset, Decimal};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures of the ledger engine and its write path.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Not enough {currency} lots: required {required}, available {available}")]
    InsufficientFiatLots {
        currency: Asset,
        required: Decimal,
        available: Decimal,
    },
    #[error("Not enough {asset} in cash: required {required}, available {available}")]
    InsufficientCashBalance {
        asset: Asset,
        required: Decimal,
        available: Decimal,
    },
    #[error("Lot {lot_id} has {remaining} remaining, cannot take {requested}")]
    InsufficientLotBalance {
        lot_id: i64,
        requested: Decimal,
        remaining: Decimal,
    },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Nothing to undo")]
    NothingToUndo,
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn status(&self) -> StatusCode {
        match self {
            LedgerError::InsufficientFiatLots { .. }
            | LedgerError::InsufficientCashBalance { .. }
            | LedgerError::InvalidAmount(_)
            | LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LedgerError::InsufficientLotBalance { .. }
            | LedgerError::ConcurrentModification(_)
            | LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::NothingToUndo | LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Db(_) | LedgerError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFiatLots { .. } => "insufficient_fiat_lots",
            LedgerError::InsufficientCashBalance { .. } => "insufficient_cash_balance",
            LedgerError::InsufficientLotBalance { .. } => "insufficient_lot_balance",
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::InvalidInput(_) => "invalid_input",
            LedgerError::NothingToUndo => "nothing_to_undo",
            LedgerError::ConcurrentModification(_) => "concurrent_modification",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Db(_) | LedgerError::Serialization(_) => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Body fields that parse as JSON but fail to deserialize are invalid amounts;
/// malformed bodies and wrong content types are plain bad requests.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => {
                AppError::Ledger(LedgerError::InvalidAmount(err.body_text()))
            }
            other => AppError::BadRequest(other.body_text()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "detail": msg, "error": "internal" }),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "detail": msg, "error": "bad_request" }),
            ),
            AppError::Ledger(err) => {
                let status = err.status();
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "ledger operation failed");
                }
                let mut body = json!({ "detail": err.to_string(), "error": err.code() });
                match &err {
                    LedgerError::InsufficientFiatLots {
                        currency: asset,
                        required,
                        available,
                    }
                    | LedgerError::InsufficientCashBalance {
                        asset,
                        required,
                        available,
                    } => {
                        body["asset"] = json!(asset);
                        body["required"] = json!(required);
                        body["available"] = json!(available);
                    }
                    _ => {}
                }
                (status, body)
            }
        };

        (status, Json(body)).into_response()
    }
}
