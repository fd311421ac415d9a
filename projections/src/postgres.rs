//! `PostgreSQL`-backed projection storage.
//!
//! Generic key-value storage for projection records:
//!
//! ```sql
//! CREATE TABLE projection_data (
//!     key TEXT PRIMARY KEY,
//!     data BYTEA NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! The store is exclusively owned by the projection that writes it; the save
//! is an upsert, so replayed events converge to the same row.

use gavel_core::projection::{ProjectionError, ProjectionStore, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::pin::Pin;

/// `PostgreSQL`-backed [`ProjectionStore`].
#[derive(Clone)]
pub struct PostgresProjectionStore {
    pool: PgPool,
    table_name: String,
}

impl PostgresProjectionStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool, table_name: String) -> Self {
        Self { pool, table_name }
    }

    /// Connect to the projection database and create a store.
    ///
    /// The read side lives in its own database, separate from the producer's
    /// authoritative store.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str, table_name: String) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool, table_name))
    }

    /// Run database migrations for the projection tables.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool, for custom queries.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ProjectionStore for PostgresProjectionStore {
    fn save(
        &self,
        key: &str,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        let data = data.to_vec();
        Box::pin(async move {
            let query = format!(
                "INSERT INTO {} (key, data, updated_at)
                 VALUES ($1, $2, now())
                 ON CONFLICT (key) DO UPDATE
                 SET data = EXCLUDED.data, updated_at = now()",
                self.table_name
            );

            sqlx::query(&query)
                .bind(&key)
                .bind(&data)
                .execute(&self.pool)
                .await
                .map_err(|e| ProjectionError::Storage(format!("Failed to save: {e}")))?;

            Ok(())
        })
    }

    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let query = format!("SELECT data FROM {} WHERE key = $1", self.table_name);

            let result: Option<(Vec<u8>,)> = sqlx::query_as(&query)
                .bind(&key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ProjectionError::Storage(format!("Failed to get: {e}")))?;

            Ok(result.map(|(data,)| data))
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let query = format!("DELETE FROM {} WHERE key = $1", self.table_name);

            // Deleting an absent key is a successful no-op.
            sqlx::query(&query)
                .bind(&key)
                .execute(&self.pool)
                .await
                .map_err(|e| ProjectionError::Storage(format!("Failed to delete: {e}")))?;

            Ok(())
        })
    }

    fn exists(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let query = format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE key = $1)",
                self.table_name
            );

            let (exists,): (bool,) = sqlx::query_as(&query)
                .bind(&key)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ProjectionError::Storage(format!("Failed to check exists: {e}")))?;

            Ok(exists)
        })
    }
}
