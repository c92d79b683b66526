//! PostgreSQL pool and embedded migrations.
//!
//! The pool backs both repositories: the payment ledger (`transactions`)
//! and the account tables (`users`, `user_stats`).

use std::time::Duration;

use sqlx::{Pool, Postgres, postgres::PgPoolOptions};

pub type DbPool = Pool<Postgres>;

const MAX_CONNECTIONS: u32 = 5;

/// Requests waiting longer than this for a connection fail.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to PostgreSQL.
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the server
/// cannot be reached or refuses the credentials.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Apply pending migrations from `migrations/`.
///
/// Applied versions are tracked in `_sqlx_migrations`, so this is safe to run
/// on every startup.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
