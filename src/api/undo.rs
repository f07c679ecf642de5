use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;

use crate::api::{AppState, DeskQuery};
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct UndoResponse {
    pub restored_description: String,
}

pub async fn undo(
    Query(query): Query<DeskQuery>,
    State(state): State<AppState>,
) -> Result<Json<UndoResponse>, AppError> {
    let desk = query.write_desk(&state);
    let restored_description = state.ledger.undo(&desk).await?;
    Ok(Json(UndoResponse {
        restored_description,
    }))
}
