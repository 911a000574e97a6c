use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::domain::{Cents, WalletId};

use super::{MIGRATION_POSTGRES_001_WALLETS, StoreError, StoreResult, UnitOfWork, WalletStore};

/// How long a caller waits for a free pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wallet store backed by PostgreSQL.
///
/// Mutations lock exactly one row with `SELECT ... FOR UPDATE`, so contention
/// is confined to the wallet being changed. The pool size bounds how many
/// units of work can be in flight at once.
#[derive(Clone)]
pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at the given URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options =
            PgConnectOptions::from_str(database_url).context("Invalid PostgreSQL database URL")?;
        Self::connect_with(options, max_connections).await
    }

    /// Connect with explicit options and verify the server is reachable.
    pub async fn connect_with(options: PgConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .context("Unable to create connection pool")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("Failed to ping database")?;

        tracing::debug!(max_connections, "postgres pool ready");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_POSTGRES_001_WALLETS)
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

impl WalletStore for PgWalletStore {
    type Unit = PgUnitOfWork;

    async fn begin(&self) -> StoreResult<PgUnitOfWork> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(PgUnitOfWork { tx })
    }

    async fn balance(&self, id: WalletId) -> StoreResult<Option<Cents>> {
        let row = sqlx::query("SELECT balance FROM wallets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch balance")?;

        Ok(row.map(|row| row.get("balance")))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl UnitOfWork for PgUnitOfWork {
    async fn lock(&mut self, id: WalletId) -> StoreResult<Option<Cents>> {
        let row = sqlx::query("SELECT balance FROM wallets WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to lock wallet")?;

        Ok(row.map(|row| row.get("balance")))
    }

    async fn insert(&mut self, id: WalletId, balance: Cents) -> StoreResult<()> {
        let result = sqlx::query("INSERT INTO wallets (id, balance) VALUES ($1, $2)")
            .bind(id)
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
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(balance)
        .execute(&mut *self.tx)
        .await
        .context("Failed to upsert wallet")?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(&mut self, id: WalletId, balance: Cents) -> StoreResult<()> {
        sqlx::query("UPDATE wallets SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(id)
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
