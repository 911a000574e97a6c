use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::domain::{Cents, WalletId};

use super::{MIGRATION_SQLITE_001_WALLETS, StoreError, StoreResult, UnitOfWork, WalletStore};

/// How long a connection waits for the database write lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Wallet store backed by a SQLite database file.
///
/// SQLite has no row locks: a unit of work takes the database-wide write lock
/// with its first statement and keeps it until commit. Mutations are therefore
/// serialized across all wallets, which is coarser than required but never
/// weaker. Unlocked reads go through WAL snapshots and do not wait on writers.
#[derive(Clone)]
pub struct SqliteWalletStore {
    pool: SqlitePool,
}

impl SqliteWalletStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    /// Creates the database file if it doesn't exist.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid SQLite database URL")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        tracing::debug!(url = database_url, max_connections, "sqlite pool ready");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_SQLITE_001_WALLETS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str, max_connections: u32) -> Result<Self> {
        let store = Self::connect(database_url, max_connections).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl WalletStore for SqliteWalletStore {
    type Unit = SqliteUnitOfWork;

    async fn begin(&self) -> StoreResult<SqliteUnitOfWork> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(SqliteUnitOfWork { tx })
    }

    async fn balance(&self, id: WalletId) -> StoreResult<Option<Cents>> {
        let row = sqlx::query("SELECT balance FROM wallets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch balance")?;

        Ok(row.map(|row| row.get("balance")))
    }
}

pub struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork for SqliteUnitOfWork {
    async fn lock(&mut self, id: WalletId) -> StoreResult<Option<Cents>> {
        // A no-op write is the first statement, so the write lock is taken
        // before the balance is read.
        let row = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance
            WHERE id = ?
            RETURNING balance
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to lock wallet")?;

        Ok(row.map(|row| row.get("balance")))
    }

    async fn insert(&mut self, id: WalletId, balance: Cents) -> StoreResult<()> {
        let result = sqlx::query("INSERT INTO wallets (id, balance) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(balance)
            .execute(&mut *self.tx)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StoreError::Conflict(id))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("Failed to insert wallet")
                .into()),
        }
    }

    async fn insert_missing(&mut self, id: WalletId, balance: Cents) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO wallets (id, balance)
            VALUES (?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(balance)
        .execute(&mut *self.tx)
        .await
        .context("Failed to upsert wallet")?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(&mut self, id: WalletId, balance: Cents) -> StoreResult<()> {
        sqlx::query("UPDATE wallets SET balance = ? WHERE id = ?")
            .bind(balance)
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .context("Failed to update balance")?;
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await.context("Failed to commit")?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await.context("Failed to roll back")?;
        Ok(())
    }
}
