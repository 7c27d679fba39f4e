//! Render job persistence.
//!
//! [`JobTable`] is the only way the queue touches job records; it is
//! implemented in memory ([`InMemoryJobTable`]) and on SQLite
//! ([`SqliteJobTable`]).

pub mod memory;
pub mod models;
pub mod sqlite;
pub mod table;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use memory::InMemoryJobTable;
pub use models::render_job::{JobSnapshot, LeaseId, RenderJob, StateGuard};
pub use models::status::JobState;
pub use sqlite::SqliteJobTable;
pub use table::{JobTable, JobTableError};

pub type DbPool = sqlx::SqlitePool;

/// Create a connection pool from a database URL (`sqlite://path?mode=rwc`
/// or `sqlite::memory:`).
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));
    // An in-memory database exists per connection, so it gets exactly one.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

/// Apply the embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Open, migrate, and wrap a SQLite job table.
pub async fn open_job_table(database_url: &str) -> Result<SqliteJobTable, JobTableError> {
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    tracing::info!(database_url, "Job store ready");
    Ok(SqliteJobTable::new(pool))
}

/// Verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
