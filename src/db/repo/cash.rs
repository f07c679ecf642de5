use super::decimal_col;
use crate::domain::{Asset, CashDeskId, Decimal, DeskScope, TimeMs};
use crate::engine::checked;
use crate::error::LedgerError;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use std::collections::BTreeMap;

/// Current balance of one asset at a desk. Missing rows read as zero.
pub async fn balance(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
    asset: &Asset,
) -> Result<Decimal, sqlx::Error> {
    let row = sqlx::query("SELECT balance FROM cash_balances WHERE cash_desk_id = ? AND asset = ?")
        .bind(desk.as_str())
        .bind(asset.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => decimal_col(&row, "balance"),
        None => Ok(Decimal::zero()),
    }
}

/// Add `delta` (possibly negative) to a balance. Returns the new balance.
///
/// Callers check for overdraft first; this only applies the change. A balance
/// that returns to zero has its row removed, so the set of stored assets is
/// the same as before the movements that created it.
pub async fn adjust_balance(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
    asset: &Asset,
    delta: Decimal,
    now: TimeMs,
) -> Result<Decimal, LedgerError> {
    let current = balance(conn, desk, asset).await?;
    let updated = checked::add("cash balance", current, delta)?;

    if updated.is_zero() {
        sqlx::query("DELETE FROM cash_balances WHERE cash_desk_id = ? AND asset = ?")
            .bind(desk.as_str())
            .bind(asset.as_str())
            .execute(&mut *conn)
            .await?;
        return Ok(updated);
    }

    sqlx::query(
        r#"
        INSERT INTO cash_balances (cash_desk_id, asset, balance, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(cash_desk_id, asset) DO UPDATE SET
            balance = excluded.balance,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(desk.as_str())
    .bind(asset.as_str())
    .bind(updated.to_canonical_string())
    .bind(now.as_ms())
    .execute(&mut *conn)
    .await?;

    Ok(updated)
}

/// Balances per asset, summed across the desks in scope.
pub async fn balances(
    conn: &mut SqliteConnection,
    scope: &DeskScope,
) -> Result<BTreeMap<Asset, Decimal>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT asset, balance FROM cash_balances WHERE {} ORDER BY asset ASC",
        scope.sql_predicate()
    ))
    .bind(scope.key())
    .fetch_all(&mut *conn)
    .await?;

    let mut totals = BTreeMap::new();
    for row in &rows {
        let asset = Asset::new(row.try_get::<String, _>("asset")?);
        let amount = decimal_col(row, "balance")?;
        let total = totals.entry(asset).or_insert_with(Decimal::zero);
        *total = total.saturating_add(amount);
    }
    Ok(totals)
}
