use crate::domain::{Asset, CashDeskId, ReversalEntry, TimeMs};
use crate::error::LedgerError;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

/// Store the desk's undo entry, replacing any previous one.
pub async fn put_entry(
    conn: &mut SqliteConnection,
    entry: &ReversalEntry,
) -> Result<(), LedgerError> {
    let currencies = serde_json::to_string(&entry.currencies)?;
    let actions = serde_json::to_string(&entry.actions)?;

    sqlx::query(
        r#"
        INSERT INTO reversal_log
            (cash_desk_id, entry_id, description, currencies, actions, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(cash_desk_id) DO UPDATE SET
            entry_id = excluded.entry_id,
            description = excluded.description,
            currencies = excluded.currencies,
            actions = excluded.actions,
            created_at = excluded.created_at
        "#,
    )
    .bind(entry.cash_desk_id.as_str())
    .bind(&entry.entry_id)
    .bind(&entry.description)
    .bind(currencies)
    .bind(actions)
    .bind(entry.created_at.as_ms())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_entry(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
) -> Result<Option<ReversalEntry>, LedgerError> {
    let row = sqlx::query(
        r#"
        SELECT entry_id, description, currencies, actions, created_at
        FROM reversal_log
        WHERE cash_desk_id = ?
        "#,
    )
    .bind(desk.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let currencies: Vec<Asset> = serde_json::from_str(&row.try_get::<String, _>("currencies")?)?;
    let actions = serde_json::from_str(&row.try_get::<String, _>("actions")?)?;

    Ok(Some(ReversalEntry {
        entry_id: row.try_get("entry_id")?,
        cash_desk_id: desk.clone(),
        description: row.try_get("description")?,
        currencies,
        actions,
        created_at: TimeMs::new(row.try_get("created_at")?),
    }))
}

pub async fn delete_entry(
    conn: &mut SqliteConnection,
    desk: &CashDeskId,
) -> Result<bool, LedgerError> {
    let result = sqlx::query("DELETE FROM reversal_log WHERE cash_desk_id = ?")
        .bind(desk.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_repo;
    use crate::domain::{Decimal, InverseAction};

    fn entry(id: &str, description: &str) -> ReversalEntry {
        ReversalEntry {
            entry_id: id.to_string(),
            cash_desk_id: CashDeskId::new("main"),
            description: description.to_string(),
            currencies: vec![Asset::new("CZK")],
            actions: vec![
                InverseAction::RestoreLot {
                    lot_id: 1,
                    amount: Decimal::from_str_canonical("0.1").unwrap(),
                },
                InverseAction::DeleteTransaction { tx_id: 7 },
            ],
            created_at: TimeMs::new(42),
        }
    }

    #[tokio::test]
    async fn test_single_slot_per_desk() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let desk = CashDeskId::new("main");

        assert!(get_entry(&mut conn, &desk).await.unwrap().is_none());

        put_entry(&mut conn, &entry("a", "first")).await.unwrap();
        put_entry(&mut conn, &entry("b", "second")).await.unwrap();

        let stored = get_entry(&mut conn, &desk).await.unwrap().unwrap();
        assert_eq!(stored, entry("b", "second"));

        assert!(delete_entry(&mut conn, &desk).await.unwrap());
        assert!(!delete_entry(&mut conn, &desk).await.unwrap());
        assert!(get_entry(&mut conn, &desk).await.unwrap().is_none());
    }
}
