use crate::domain::{CashDesk, CashDeskId, TimeMs};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

fn desk_from_row(row: &SqliteRow) -> Result<CashDesk, sqlx::Error> {
    Ok(CashDesk {
        id: CashDeskId::new(row.try_get::<String, _>("id")?),
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        created_at: TimeMs::new(row.try_get("created_at")?),
        deleted_at: row.try_get::<Option<i64>, _>("deleted_at")?.map(TimeMs::new),
    })
}

/// Insert the desk if it does not exist yet. Returns true when created.
pub async fn ensure_cash_desk(
    conn: &mut SqliteConnection,
    id: &CashDeskId,
    tenant_id: &str,
    name: &str,
    now: TimeMs,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO cash_desks (id, tenant_id, name, is_active, created_at)
        VALUES (?, ?, ?, 1, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(id.as_str())
    .bind(tenant_id)
    .bind(name)
    .bind(now.as_ms())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_cash_desk(
    conn: &mut SqliteConnection,
    id: &CashDeskId,
) -> Result<Option<CashDesk>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, tenant_id, name, is_active, created_at, deleted_at
        FROM cash_desks
        WHERE id = ?
        "#,
    )
    .bind(id.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(desk_from_row).transpose()
}

pub async fn list_cash_desks(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    include_inactive: bool,
) -> Result<Vec<CashDesk>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, tenant_id, name, is_active, created_at, deleted_at
        FROM cash_desks
        WHERE tenant_id = ? AND (is_active = 1 OR ?)
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(tenant_id)
    .bind(include_inactive)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(desk_from_row).collect()
}

/// Soft-delete a desk. Returns false if it was unknown or already inactive.
pub async fn deactivate_cash_desk(
    conn: &mut SqliteConnection,
    id: &CashDeskId,
    now: TimeMs,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE cash_desks
        SET is_active = 0, deleted_at = ?
        WHERE id = ? AND is_active = 1
        "#,
    )
    .bind(now.as_ms())
    .bind(id.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_repo;

    #[tokio::test]
    async fn test_desk_lifecycle() {
        let (repo, _dir) = setup_test_repo().await;
        let mut conn = repo.conn().await.unwrap();
        let branch = CashDeskId::new("branch");

        assert!(ensure_cash_desk(&mut conn, &branch, "default", "Branch", TimeMs::new(5))
            .await
            .unwrap());
        assert!(!ensure_cash_desk(&mut conn, &branch, "default", "Other", TimeMs::new(6))
            .await
            .unwrap());

        let desks = list_cash_desks(&mut conn, "default", false).await.unwrap();
        assert_eq!(desks.len(), 2);
        assert_eq!(desks[1].name, "Branch");

        assert!(deactivate_cash_desk(&mut conn, &branch, TimeMs::new(9))
            .await
            .unwrap());
        assert!(!deactivate_cash_desk(&mut conn, &branch, TimeMs::new(10))
            .await
            .unwrap());

        let active = list_cash_desks(&mut conn, "default", false).await.unwrap();
        assert_eq!(active.len(), 1);
        let all = list_cash_desks(&mut conn, "default", true).await.unwrap();
        assert_eq!(all.len(), 2);

        let desk = get_cash_desk(&mut conn, &branch).await.unwrap().unwrap();
        assert!(!desk.is_active);
        assert_eq!(desk.deleted_at, Some(TimeMs::new(9)));
        assert!(get_cash_desk(&mut conn, &CashDeskId::new("nope"))
            .await
            .unwrap()
            .is_none());
    }
}
