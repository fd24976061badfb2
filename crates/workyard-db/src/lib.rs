//! Storage layer for Workyard.
//!
//! Provides repository traits with PostgreSQL and in-memory implementations.

pub mod error;
pub mod memory;
pub mod repo;
pub mod seed;

pub use error::{DbError, DbResult};
pub use memory::{MemoryJobRepo, MemoryWorkerRepo};
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
