//! SQLite persistence for the gateway.
//!
//! Pool construction, migrations, and a health probe, plus repository
//! structs over the two tables (`messages`, `auth_status`). The
//! database file lives in the gateway's `data/` directory.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub mod models;
pub mod repositories;

/// Shared connection pool type.
pub type DbPool = sqlx::SqlitePool;

/// Open (creating if missing) the database at `database_url`.
///
/// WAL journaling keeps the proxy's write path from blocking readers
/// on the admin API.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Cheap liveness probe used at startup and by the health monitor.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from the crate's `migrations/` directory.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
