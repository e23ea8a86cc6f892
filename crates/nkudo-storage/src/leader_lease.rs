//! Single-leader election for the offline sweeper and audit verifier,
//! backed by one row per lease key.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::StoreError;

/// Attempt to acquire (or renew, if already held by `holder_id`) a named
/// leader lease. Returns `true` if `holder_id` now holds the lease.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn try_acquire(
    pool: &PgPool,
    lease_id: &str,
    holder_id: &str,
    ttl_secs: i64,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let expires_at = now + chrono::Duration::seconds(ttl_secs);

    let acquired = sqlx::query(
        r"
        INSERT INTO leader_leases (id, held_by, lease_expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET held_by = $2, lease_expires_at = $3
        WHERE leader_leases.held_by = $2 OR leader_leases.lease_expires_at < $4
        ",
    )
    .bind(lease_id)
    .bind(holder_id)
    .bind(expires_at)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(acquired.rows_affected() == 1)
}

/// Release a held lease immediately (used on graceful shutdown).
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn release(pool: &PgPool, lease_id: &str, holder_id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM leader_leases WHERE id = $1 AND held_by = $2")
        .bind(lease_id)
        .bind(holder_id)
        .execute(pool)
        .await?;
    Ok(())
}
