//! Connection pool setup.

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::StoreError;

/// Connect to Postgres and run pending migrations.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] if the connection or a migration fails.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to connect to database: {e}")))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Internal(format!("migration failed: {e}")))?;

    Ok(pool)
}
