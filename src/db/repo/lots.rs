use super::{bad_column, decimal_col, opt_decimal_col};
use crate::domain::{
    Asset, CashDeskId, Decimal, DeskScope, FiatLot, InheritedCost, LotSource, NewLot, TimeMs,
};
use crate::error::LedgerError;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

const LOT_COLUMNS: &str = "id, cash_desk_id, currency, original_amount, remaining, rate, \
    origin_tx_id, created_at, source, fee_percent, cost_usdt_of_fiat_in, rate_usdt_of_fiat_in";

fn lot_from_row(row: &SqliteRow) -> Result<FiatLot, sqlx::Error> {
    let source_raw: String = row.try_get("source")?;
    let source = source_raw
        .parse::<LotSource>()
        .map_err(|e| bad_column("source", e))?;

    let inherited_cost = match (
        opt_decimal_col(row, "cost_usdt_of_fiat_in")?,
        opt_decimal_col(row, "rate_usdt_of_fiat_in")?,
    ) {
        (Some(cost_usdt_of_fiat_in), Some(rate_usdt_of_fiat_in)) => Some(InheritedCost {
            cost_usdt_of_fiat_in,
            rate_usdt_of_fiat_in,
        }),
        _ => None,
    };

    Ok(FiatLot {
        id: row.try_get("id")?,
        cash_desk_id: CashDeskId::new(row.try_get::<String, _>("cash_desk_id")?),
        currency: Asset::new(row.try_get::<String, _>("currency")?),
        original_amount: decimal_col(row, "original_amount")?,
        remaining: decimal_col(row, "remaining")?,
        rate: decimal_col(row, "rate")?,
        origin_tx_id: row.try_get("origin_tx_id")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
        source,
        fee_percent: decimal_col(row, "fee_percent")?,
        inherited_cost,
    })
}

/// Create a lot. `remaining` starts at the full amount.
pub async fn insert_lot(
    conn: &mut SqliteConnection,
    lot: &NewLot,
    created_at: TimeMs,
) -> Result<FiatLot, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO fiat_lots (
            cash_desk_id, currency, original_amount, remaining, is_open, rate,
            origin_tx_id, created_at, source, fee_percent,
            cost_usdt_of_fiat_in, rate_usdt_of_fiat_in
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(lot.cash_desk_id.as_str())
    .bind(lot.currency.as_str())
    .bind(lot.amount.to_canonical_string())
    .bind(lot.amount.to_canonical_string())
    .bind(lot.amount.is_positive())
    .bind(lot.rate.to_canonical_string())
    .bind(lot.origin_tx_id)
    .bind(created_at.as_ms())
    .bind(lot.source.as_str())
    .bind(lot.fee_percent.to_canonical_string())
    .bind(lot.inherited_cost.map(|c| c.cost_usdt_of_fiat_in.to_canonical_string()))
    .bind(lot.inherited_cost.map(|c| c.rate_usdt_of_fiat_in.to_canonical_string()))
    .execute(&mut *conn)
    .await?;

    Ok(FiatLot {
        id: result.last_insert_rowid(),
        cash_desk_id: lot.cash_desk_id.clone(),
        currency: lot.currency.clone(),
        original_amount: lot.amount,
        remaining: lot.amount,
        rate: lot.rate,
        origin_tx_id: lot.origin_tx_id,
        created_at,
        source: lot.source,
        fee_percent: lot.fee_percent,
        inherited_cost: lot.inherited_cost,
    })
}

/// Put back a previously deleted lot under its original id.
pub async fn reinsert_lot(conn: &mut SqliteConnection, lot: &FiatLot) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO fiat_lots (
            id, cash_desk_id, currency, original_amount, remaining, is_open, rate,
            origin_tx_id, created_at, source, fee_percent,
            cost_usdt_of_fiat_in, rate_usdt_of_fiat_in
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(lot.id)
    .bind(lot.cash_desk_id.as_str())
    .bind(lot.currency.as_str())
    .bind(lot.original_amount.to_canonical_string())
    .bind(lot.remaining.to_canonical_string())
    .bind(lot.remaining.is_positive())
    .bind(lot.rate.to_canonical_string())
    .bind(lot.origin_tx_id)
    .bind(lot.created_at.as_ms())
    .bind(lot.source.as_str())
    .bind(lot.fee_percent.to_canonical_string())
    .bind(lot.inherited_cost.map(|c| c.cost_usdt_of_fiat_in.to_canonical_string()))
    .bind(lot.inherited_cost.map(|c| c.rate_usdt_of_fiat_in.to_canonical_string()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_lot(
    conn: &mut SqliteConnection,
    lot_id: i64,
) -> Result<Option<FiatLot>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {} FROM fiat_lots WHERE id = ?", LOT_COLUMNS))
        .bind(lot_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(lot_from_row).transpose()
}

/// The lot created by a transaction, if any.
pub async fn lot_for_origin(
    conn: &mut SqliteConnection,
    tx_id: i64,
) -> Result<Option<FiatLot>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM fiat_lots WHERE origin_tx_id = ?",
        LOT_COLUMNS
    ))
    .bind(tx_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(lot_from_row).transpose()
}

/// Lots with `remaining > 0` in FIFO order: oldest first, ties by ascending id.
pub async fn open_lots(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
    currency: &Asset,
) -> Result<Vec<FiatLot>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}
        FROM fiat_lots
        WHERE cash_desk_id = ? AND currency = ? AND is_open = 1
        ORDER BY created_at ASC, id ASC
        "#,
        LOT_COLUMNS
    ))
    .bind(desk.as_str())
    .bind(currency.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(lot_from_row).collect()
}

/// All lots in scope, exhausted included, optionally for one currency.
pub async fn list_lots(
    conn: &mut SqliteConnection,
    scope: &DeskScope,
    currency: Option<&Asset>,
) -> Result<Vec<FiatLot>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}
        FROM fiat_lots
        WHERE {} AND (? IS NULL OR currency = ?)
        ORDER BY created_at ASC, id ASC
        "#,
        LOT_COLUMNS,
        scope.sql_predicate()
    ))
    .bind(scope.key())
    .bind(currency.map(|c| c.as_str()))
    .bind(currency.map(|c| c.as_str()))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(lot_from_row).collect()
}

async fn set_remaining(
    conn: &mut SqliteConnection,
    lot_id: i64,
    remaining: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE fiat_lots SET remaining = ?, is_open = ? WHERE id = ?")
        .bind(remaining.to_canonical_string())
        .bind(remaining.is_positive())
        .bind(lot_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Draw `amount` from a lot. Returns the new remaining.
///
/// Must run inside the write transaction that holds the lot's desk lock.
pub async fn decrement_lot(
    conn: &mut SqliteConnection,
    lot_id: i64,
    amount: Decimal,
) -> Result<Decimal, LedgerError> {
    if amount.is_negative() {
        return Err(LedgerError::InvalidAmount(format!(
            "cannot decrement lot {} by {}",
            lot_id, amount
        )));
    }
    let lot = get_lot(conn, lot_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("lot {}", lot_id)))?;
    if amount > lot.remaining {
        return Err(LedgerError::InsufficientLotBalance {
            lot_id,
            requested: amount,
            remaining: lot.remaining,
        });
    }

    let remaining = lot.remaining - amount;
    set_remaining(conn, lot_id, remaining).await?;
    Ok(remaining)
}

/// Give `amount` back to a lot. Never lifts `remaining` above the original amount.
pub async fn restore_lot(
    conn: &mut SqliteConnection,
    lot_id: i64,
    amount: Decimal,
) -> Result<Decimal, LedgerError> {
    let lot = get_lot(conn, lot_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("lot {}", lot_id)))?;
    let remaining = lot.remaining + amount;
    if amount.is_negative() || remaining > lot.original_amount {
        return Err(LedgerError::Conflict(format!(
            "restoring {} to lot {} would exceed its original amount {}",
            amount, lot_id, lot.original_amount
        )));
    }

    set_remaining(conn, lot_id, remaining).await?;
    Ok(remaining)
}

pub async fn delete_lot(conn: &mut SqliteConnection, lot_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM fiat_lots WHERE id = ?")
        .bind(lot_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_repo;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn new_lot(currency: &str, amount: &str, rate: &str) -> NewLot {
        NewLot {
            cash_desk_id: CashDeskId::new("main"),
            currency: Asset::new(currency),
            amount: d(amount),
            rate: d(rate),
            source: LotSource::Deposit,
            fee_percent: Decimal::zero(),
            origin_tx_id: None,
            inherited_cost: None,
        }
    }

    #[tokio::test]
    async fn test_open_lots_fifo_and_exhaustion() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let desk = CashDeskId::new("main");
        let czk = Asset::new("CZK");

        let later = insert_lot(&mut conn, &new_lot("CZK", "500", "22.8"), TimeMs::new(2000))
            .await
            .unwrap();
        let first = insert_lot(&mut conn, &new_lot("CZK", "1000", "23"), TimeMs::new(1000))
            .await
            .unwrap();
        let tie = insert_lot(&mut conn, &new_lot("CZK", "10", "23"), TimeMs::new(1000))
            .await
            .unwrap();
        insert_lot(&mut conn, &new_lot("EUR", "10", "0.9"), TimeMs::new(0))
            .await
            .unwrap();

        let ids: Vec<i64> = open_lots(&mut conn, &desk, &czk)
            .await
            .unwrap()
            .iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec![first.id, tie.id, later.id]);

        let remaining = decrement_lot(&mut conn, first.id, d("1000")).await.unwrap();
        assert!(remaining.is_zero());

        let open = open_lots(&mut conn, &desk, &czk).await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, tie.id);

        let all = list_lots(&mut conn, &DeskScope::Desk(desk.clone()), Some(&czk))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|l| l.id == first.id && l.is_exhausted()));
    }

    #[tokio::test]
    async fn test_decrement_beyond_remaining_fails() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let lot = insert_lot(&mut conn, &new_lot("CZK", "100", "23"), TimeMs::new(1))
            .await
            .unwrap();

        let err = decrement_lot(&mut conn, lot.id, d("100.01")).await.unwrap_err();
        match err {
            LedgerError::InsufficientLotBalance {
                lot_id,
                requested,
                remaining,
            } => {
                assert_eq!(lot_id, lot.id);
                assert_eq!(requested, d("100.01"));
                assert_eq!(remaining, d("100"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let stored = get_lot(&mut conn, lot.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining, d("100"));
    }

    #[tokio::test]
    async fn test_restore_bounded_by_original() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let lot = insert_lot(&mut conn, &new_lot("CZK", "100", "23"), TimeMs::new(1))
            .await
            .unwrap();
        decrement_lot(&mut conn, lot.id, d("100")).await.unwrap();

        assert_eq!(restore_lot(&mut conn, lot.id, d("40")).await.unwrap(), d("40"));
        let reopened = open_lots(&mut conn, &CashDeskId::new("main"), &Asset::new("CZK"))
            .await
            .unwrap();
        assert_eq!(reopened.len(), 1);

        let err = restore_lot(&mut conn, lot.id, d("60.01")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_inherited_cost_round_trips() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let mut new = new_lot("EUR", "92", "0.92");
        new.source = LotSource::FiatToFiat;
        new.inherited_cost = Some(InheritedCost {
            cost_usdt_of_fiat_in: d("100"),
            rate_usdt_of_fiat_in: d("0.92"),
        });
        let lot = insert_lot(&mut conn, &new, TimeMs::new(1)).await.unwrap();

        let stored = get_lot(&mut conn, lot.id).await.unwrap().unwrap();
        assert_eq!(stored, lot);

        assert!(delete_lot(&mut conn, lot.id).await.unwrap());
        reinsert_lot(&mut conn, &lot).await.unwrap();
        assert_eq!(get_lot(&mut conn, lot.id).await.unwrap().unwrap(), lot);
    }
}
