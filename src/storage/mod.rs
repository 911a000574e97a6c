mod memory;
mod postgres;
mod sqlite;
mod store;

pub use memory::*;
pub use postgres::*;
pub use sqlite::*;
pub use store::*;

/// SQL migration for the wallets table (SQLite)
pub const MIGRATION_SQLITE_001_WALLETS: &str = include_str!("migrations/sqlite/001_wallets.sql");

/// SQL migration for the wallets table (PostgreSQL)
pub const MIGRATION_POSTGRES_001_WALLETS: &str =
    include_str!("migrations/postgres/001_wallets.sql");
