// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;
use uuid::Uuid;
use wallet_ledger::application::{LedgerService, OpContext};
use wallet_ledger::storage::SqliteWalletStore;

/// Pool size used by test databases
pub const TEST_POOL_SIZE: u32 = 8;

/// Helper to create a test service with a temporary SQLite database
pub async fn test_service() -> Result<(LedgerService<SqliteWalletStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let url = format!("sqlite:{}", db_path.display());
    let store = SqliteWalletStore::init(&url, TEST_POOL_SIZE).await?;
    Ok((LedgerService::new(store), temp_dir))
}

/// Same as [`test_service`], shared for use across spawned tasks
pub async fn shared_test_service() -> Result<(Arc<LedgerService<SqliteWalletStore>>, TempDir)> {
    let (service, temp_dir) = test_service().await?;
    Ok((Arc::new(service), temp_dir))
}

pub fn ctx() -> OpContext {
    OpContext::background()
}

/// Test fixture: a freshly created wallet with the given opening balance
pub async fn funded_wallet(service: &LedgerService<SqliteWalletStore>, cents: i64) -> Result<Uuid> {
    let id = Uuid::new_v4();
    service.create_wallet(&ctx(), id, cents).await?;
    Ok(id)
}
