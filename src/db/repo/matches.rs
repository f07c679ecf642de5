use super::{bad_column, decimal_col, opt_decimal_col};
use crate::domain::{Asset, CashDeskId, DeskScope, PnlMatch, Stage, TimeMs};
use crate::engine::Consumption;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

const MATCH_COLUMNS: &str = "id, cash_desk_id, currency, open_lot_id, close_tx_id, fiat_used, \
    matched_usdt, lot_rate, sell_rate_eff, pnl_fiat, pnl_usdt, cost_usdt_of_fiat_in, stage, \
    created_at";

fn match_from_row(row: &SqliteRow) -> Result<PnlMatch, sqlx::Error> {
    let stage_raw: i64 = row.try_get("stage")?;
    let stage = Stage::from_i64(stage_raw)
        .ok_or_else(|| bad_column("stage", format!("invalid stage {}", stage_raw)))?;

    Ok(PnlMatch {
        id: row.try_get("id")?,
        cash_desk_id: CashDeskId::new(row.try_get::<String, _>("cash_desk_id")?),
        currency: Asset::new(row.try_get::<String, _>("currency")?),
        open_lot_id: row.try_get("open_lot_id")?,
        close_tx_id: row.try_get("close_tx_id")?,
        fiat_used: decimal_col(row, "fiat_used")?,
        matched_usdt: decimal_col(row, "matched_usdt")?,
        lot_rate: decimal_col(row, "lot_rate")?,
        sell_rate_eff: decimal_col(row, "sell_rate_eff")?,
        pnl_fiat: decimal_col(row, "pnl_fiat")?,
        pnl_usdt: decimal_col(row, "pnl_usdt")?,
        cost_usdt_of_fiat_in: opt_decimal_col(row, "cost_usdt_of_fiat_in")?,
        stage,
        created_at: TimeMs::new(row.try_get("created_at")?),
    })
}

async fn write_match(
    conn: &mut SqliteConnection,
    id: Option<i64>,
    m: &PnlMatch,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO pnl_matches (
            id, cash_desk_id, currency, open_lot_id, close_tx_id, fiat_used,
            matched_usdt, lot_rate, sell_rate_eff, pnl_fiat, pnl_usdt,
            cost_usdt_of_fiat_in, stage, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(m.cash_desk_id.as_str())
    .bind(m.currency.as_str())
    .bind(m.open_lot_id)
    .bind(m.close_tx_id)
    .bind(m.fiat_used.to_canonical_string())
    .bind(m.matched_usdt.to_canonical_string())
    .bind(m.lot_rate.to_canonical_string())
    .bind(m.sell_rate_eff.to_canonical_string())
    .bind(m.pnl_fiat.to_canonical_string())
    .bind(m.pnl_usdt.to_canonical_string())
    .bind(m.cost_usdt_of_fiat_in.map(|c| c.to_canonical_string()))
    .bind(m.stage.as_i64())
    .bind(m.created_at.as_ms())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Record one planned consumption as a match of `close_tx_id`.
pub async fn insert_match(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
    currency: &Asset,
    close_tx_id: i64,
    consumption: &Consumption,
    created_at: TimeMs,
) -> Result<PnlMatch, sqlx::Error> {
    let mut m = PnlMatch {
        id: 0,
        cash_desk_id: desk.clone(),
        currency: currency.clone(),
        open_lot_id: consumption.lot_id,
        close_tx_id,
        fiat_used: consumption.fiat_used,
        matched_usdt: consumption.matched_usdt,
        lot_rate: consumption.lot_rate,
        sell_rate_eff: consumption.sell_rate_eff,
        pnl_fiat: consumption.pnl_fiat,
        pnl_usdt: consumption.pnl_usdt,
        cost_usdt_of_fiat_in: consumption.cost_usdt_of_fiat_in,
        stage: consumption.stage,
        created_at,
    };
    m.id = write_match(conn, None, &m).await?;
    Ok(m)
}

/// Put back a previously deleted match under its original id.
pub async fn reinsert_match(conn: &mut SqliteConnection, m: &PnlMatch) -> Result<(), sqlx::Error> {
    write_match(conn, Some(m.id), m).await?;
    Ok(())
}

pub async fn matches_for_close(
    conn: &mut SqliteConnection,
    close_tx_id: i64,
) -> Result<Vec<PnlMatch>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM pnl_matches WHERE close_tx_id = ? ORDER BY id ASC",
        MATCH_COLUMNS
    ))
    .bind(close_tx_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(match_from_row).collect()
}

/// Number of matches that drew from a lot.
pub async fn count_for_lot(conn: &mut SqliteConnection, lot_id: i64) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM pnl_matches WHERE open_lot_id = ?")
        .bind(lot_id)
        .fetch_one(&mut *conn)
        .await?;
    row.try_get("n")
}

pub async fn list_matches(
    conn: &mut SqliteConnection,
    scope: &DeskScope,
    currency: Option<&Asset>,
) -> Result<Vec<PnlMatch>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}
        FROM pnl_matches
        WHERE {} AND (? IS NULL OR currency = ?)
        ORDER BY created_at ASC, id ASC
        "#,
        MATCH_COLUMNS,
        scope.sql_predicate()
    ))
    .bind(scope.key())
    .bind(currency.map(|c| c.as_str()))
    .bind(currency.map(|c| c.as_str()))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(match_from_row).collect()
}

pub async fn delete_matches_for_close(
    conn: &mut SqliteConnection,
    close_tx_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pnl_matches WHERE close_tx_id = ?")
        .bind(close_tx_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
