pub mod checkpoint;
pub mod discrepancy;
pub mod edit;
pub mod forecast;
pub mod invoice;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod run;
pub mod schema;

pub use schema::ensure_schema;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use syncline_common::error::{SynclineError, SynclineResult};

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> SynclineResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_fails_with_invalid_url() {
        let result = create_pool("postgres://invalid:5432/nonexistent").await;
        assert!(result.is_err());
    }
}
