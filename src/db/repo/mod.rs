//! Repository layer for database operations.
//!
//! Row-level functions live in submodules and take a `&mut SqliteConnection`,
//! so the same SQL runs on a pooled connection (reads) or inside a
//! [`WriteTx`] (mutations):
//! - `desks.rs` - cash desk lifecycle
//! - `lots.rs` - fiat lots
//! - `matches.rs` - PnL matches
//! - `transactions.rs` - transaction log
//! - `cash.rs` - cash balances
//! - `reversal.rs` - per-desk undo slot

pub mod cash;
pub mod desks;
pub mod lots;
pub mod matches;
pub mod reversal;
pub mod transactions;

use crate::domain::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite};

/// Repository for database operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check out a connection for reads.
    pub async fn conn(&self) -> Result<PoolConnection<Sqlite>, sqlx::Error> {
        self.pool.acquire().await
    }

    /// Start a write transaction holding SQLite's write lock from the first
    /// statement on.
    pub async fn begin_write(&self) -> Result<WriteTx, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(WriteTx { conn: Some(conn) })
    }
}

/// An open `BEGIN IMMEDIATE` transaction on a pooled connection.
///
/// Dropped without [`WriteTx::commit`] the transaction is rolled back before
/// the connection goes back to the pool.
pub struct WriteTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTx {
    pub fn conn(&mut self) -> Result<&mut SqliteConnection, sqlx::Error> {
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(sqlx::Error::PoolClosed),
        }
    }

    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
                // Keep the connection out of the pool: its state is unknown.
                drop(conn.detach());
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), sqlx::Error> {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                drop(conn.detach());
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        tracing::warn!(error = %e, "rollback of abandoned write failed");
                        drop(conn.detach());
                    }
                });
            }
            Err(_) => drop(conn.detach()),
        }
    }
}

/// Read a canonical decimal TEXT column.
pub(crate) fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    Decimal::from_str_canonical(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

pub(crate) fn opt_decimal_col(row: &SqliteRow, col: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| {
        Decimal::from_str_canonical(&s).map_err(|e| sqlx::Error::ColumnDecode {
            index: col.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

/// Decode error for a column holding an unexpected value.
pub(crate) fn bad_column(col: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: message.into(),
    }
}
