use super::{bad_column, decimal_col, opt_decimal_col};
use crate::domain::{
    Asset, CashDeskId, DeskScope, TimeMs, Transaction, TransactionColumns, TransactionKind,
    TransactionType,
};
use crate::engine::TransactionCounts;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

const TX_COLUMNS: &str = "id, cash_desk_id, tx_type, from_asset, to_asset, amount_from, \
    rate_used, fee_percent, fee_amount, amount_to_final, rate_for_gleb_pnl, profit, \
    profit_currency, realized_profit_usdt, cost_usdt_of_fiat_in, rate_usdt_of_fiat_in, note, \
    created_at, is_modified";

fn columns_from_row(row: &SqliteRow) -> Result<TransactionColumns, sqlx::Error> {
    let tx_type_raw: String = row.try_get("tx_type")?;
    let tx_type = tx_type_raw
        .parse::<TransactionType>()
        .map_err(|e| bad_column("tx_type", e))?;

    Ok(TransactionColumns {
        id: row.try_get("id")?,
        cash_desk_id: row.try_get("cash_desk_id")?,
        tx_type,
        from_asset: row.try_get("from_asset")?,
        to_asset: row.try_get("to_asset")?,
        amount_from: decimal_col(row, "amount_from")?,
        rate_used: decimal_col(row, "rate_used")?,
        fee_percent: decimal_col(row, "fee_percent")?,
        fee_amount: decimal_col(row, "fee_amount")?,
        amount_to_final: decimal_col(row, "amount_to_final")?,
        rate_for_gleb_pnl: opt_decimal_col(row, "rate_for_gleb_pnl")?,
        profit: decimal_col(row, "profit")?,
        profit_currency: row.try_get("profit_currency")?,
        realized_profit_usdt: opt_decimal_col(row, "realized_profit_usdt")?,
        cost_usdt_of_fiat_in: opt_decimal_col(row, "cost_usdt_of_fiat_in")?,
        rate_usdt_of_fiat_in: opt_decimal_col(row, "rate_usdt_of_fiat_in")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        is_modified: row.try_get::<i64, _>("is_modified")? != 0,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, sqlx::Error> {
    Transaction::try_from(columns_from_row(row)?).map_err(|e| bad_column("tx_type", e))
}

async fn write_columns(
    conn: &mut SqliteConnection,
    id: Option<i64>,
    c: &TransactionColumns,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO transactions (
            id, cash_desk_id, tx_type, from_asset, to_asset, amount_from,
            rate_used, fee_percent, fee_amount, amount_to_final, rate_for_gleb_pnl, profit,
            profit_currency, realized_profit_usdt, cost_usdt_of_fiat_in, rate_usdt_of_fiat_in,
            note, created_at, is_modified
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(&c.cash_desk_id)
    .bind(c.tx_type.as_str())
    .bind(&c.from_asset)
    .bind(&c.to_asset)
    .bind(c.amount_from.to_canonical_string())
    .bind(c.rate_used.to_canonical_string())
    .bind(c.fee_percent.to_canonical_string())
    .bind(c.fee_amount.to_canonical_string())
    .bind(c.amount_to_final.to_canonical_string())
    .bind(c.rate_for_gleb_pnl.map(|v| v.to_canonical_string()))
    .bind(c.profit.to_canonical_string())
    .bind(c.profit_currency.as_deref())
    .bind(c.realized_profit_usdt.map(|v| v.to_canonical_string()))
    .bind(c.cost_usdt_of_fiat_in.map(|v| v.to_canonical_string()))
    .bind(c.rate_usdt_of_fiat_in.map(|v| v.to_canonical_string()))
    .bind(&c.note)
    .bind(c.created_at)
    .bind(c.is_modified)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn insert_transaction(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
    kind: TransactionKind,
    note: &str,
    created_at: TimeMs,
) -> Result<Transaction, sqlx::Error> {
    let mut tx = Transaction {
        id: 0,
        cash_desk_id: desk.clone(),
        kind,
        note: note.to_string(),
        created_at,
        is_modified: false,
    };
    tx.id = write_columns(conn, None, &TransactionColumns::from(&tx)).await?;
    Ok(tx)
}

/// Put back a previously deleted transaction under its original id.
pub async fn reinsert_transaction(
    conn: &mut SqliteConnection,
    columns: &TransactionColumns,
) -> Result<(), sqlx::Error> {
    write_columns(conn, Some(columns.id), columns).await?;
    Ok(())
}

pub async fn get_transaction(
    conn: &mut SqliteConnection,
    tx_id: i64,
) -> Result<Option<Transaction>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM transactions WHERE id = ?",
        TX_COLUMNS
    ))
    .bind(tx_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(transaction_from_row).transpose()
}

/// Newest first.
pub async fn list_transactions(
    conn: &mut SqliteConnection,
    scope: &DeskScope,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM transactions WHERE {} ORDER BY created_at DESC, id DESC",
        TX_COLUMNS,
        scope.sql_predicate()
    ))
    .bind(scope.key())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(transaction_from_row).collect()
}

/// Overwrite the note, the only field editable after creation.
pub async fn set_note(
    conn: &mut SqliteConnection,
    tx_id: i64,
    note: &str,
    is_modified: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE transactions SET note = ?, is_modified = ? WHERE id = ?")
        .bind(note)
        .bind(is_modified)
        .bind(tx_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_transaction(
    conn: &mut SqliteConnection,
    tx_id: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM transactions WHERE id = ?")
        .bind(tx_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Buys paid in `currency` and sells paid out in it.
pub async fn count_for_currency(
    conn: &mut SqliteConnection,
    scope: &DeskScope,
    currency: &Asset,
) -> Result<TransactionCounts, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT
            COALESCE(SUM(CASE
                WHEN tx_type = 'fiat_to_crypto' AND from_asset = ? THEN 1 ELSE 0
            END), 0) AS buys,
            COALESCE(SUM(CASE
                WHEN tx_type = 'crypto_to_fiat' AND to_asset = ? THEN 1 ELSE 0
            END), 0) AS sells
        FROM transactions
        WHERE {}
        "#,
        scope.sql_predicate()
    ))
    .bind(currency.as_str())
    .bind(currency.as_str())
    .bind(scope.key())
    .fetch_one(&mut *conn)
    .await?;

    Ok(TransactionCounts {
        buy_count: row.try_get::<i64, _>("buys")? as u64,
        sell_count: row.try_get::<i64, _>("sells")? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_repo;
    use crate::domain::Decimal;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn buy(amount: &str) -> TransactionKind {
        TransactionKind::FiatToCrypto {
            fiat: Asset::new("CZK"),
            crypto: Asset::usdt(),
            fiat_in: d(amount),
            rate_used: d("23"),
            fee_percent: Decimal::zero(),
            fee_amount: Decimal::zero(),
            crypto_out: d(amount) / d("23"),
            effective_rate: d("23"),
        }
    }

    #[tokio::test]
    async fn test_insert_get_list_and_counts() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let desk = CashDeskId::new("main");

        let first = insert_transaction(&mut conn, &desk, buy("2300"), "first", TimeMs::new(1))
            .await
            .unwrap();
        let second = insert_transaction(&mut conn, &desk, buy("460"), "", TimeMs::new(2))
            .await
            .unwrap();

        let fetched = get_transaction(&mut conn, first.id).await.unwrap().unwrap();
        assert_eq!(fetched, first);

        let listed = list_transactions(&mut conn, &DeskScope::Desk(desk.clone()))
            .await
            .unwrap();
        assert_eq!(
            listed.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        let counts = count_for_currency(&mut conn, &DeskScope::Desk(desk), &Asset::new("CZK"))
            .await
            .unwrap();
        assert_eq!(counts.buy_count, 2);
        assert_eq!(counts.sell_count, 0);
    }

    #[tokio::test]
    async fn test_note_update_marks_modified() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let tx = insert_transaction(
            &mut conn,
            &CashDeskId::new("main"),
            buy("23"),
            "",
            TimeMs::new(1),
        )
        .await
        .unwrap();

        assert!(set_note(&mut conn, tx.id, "regular client", true).await.unwrap());
        let fetched = get_transaction(&mut conn, tx.id).await.unwrap().unwrap();
        assert_eq!(fetched.note, "regular client");
        assert!(fetched.is_modified);
        assert!(!set_note(&mut conn, 9999, "x", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_reinsert_keeps_id() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let tx = insert_transaction(
            &mut conn,
            &CashDeskId::new("main"),
            buy("23"),
            "",
            TimeMs::new(1),
        )
        .await
        .unwrap();
        let snapshot = TransactionColumns::from(&tx);

        assert!(delete_transaction(&mut conn, tx.id).await.unwrap());
        assert!(get_transaction(&mut conn, tx.id).await.unwrap().is_none());

        reinsert_transaction(&mut conn, &snapshot).await.unwrap();
        assert_eq!(get_transaction(&mut conn, tx.id).await.unwrap().unwrap(), tx);
    }
}
