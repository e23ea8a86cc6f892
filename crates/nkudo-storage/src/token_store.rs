//! Enrollment token repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::EnrollmentToken;

/// Issue a one-time enrollment token. The caller has already hashed the
/// plaintext token; only the hash is stored.
///
/// # Errors
///
/// Returns [`StoreError::Conflict`] on a hash collision (never expected in
/// practice given the token's entropy floor).
pub async fn create_token(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<EnrollmentToken, StoreError> {
    let token = sqlx::query_as::<_, EnrollmentToken>(
        r"
        INSERT INTO enrollment_tokens (tenant_id, site_id, token_hash, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, tenant_id, site_id, token_hash, expires_at, used_at, created_at
        ",
    )
    .bind(tenant_id)
    .bind(site_id)
    .bind(token_hash)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    Ok(token)
}

/// Outcome of looking a token hash up — distinguishes "does not exist" from
/// "exists but already used" since they map to different error codes.
pub enum TokenLookup {
    Found(EnrollmentToken),
    NotFound,
}

/// Look a token up by its hash without consuming it.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn find_by_hash(pool: &PgPool, token_hash: &str) -> Result<TokenLookup, StoreError> {
    let token = sqlx::query_as::<_, EnrollmentToken>(
        "SELECT id, tenant_id, site_id, token_hash, expires_at, used_at, created_at FROM enrollment_tokens WHERE token_hash = $1",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    Ok(match token {
        Some(t) => TokenLookup::Found(t),
        None => TokenLookup::NotFound,
    })
}

/// Atomically mark a token used, but only if it is still unused. Returns
/// `false` if another request already consumed it (a race the caller must
/// treat as `TOKEN_USED`).
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn mark_used(pool: &PgPool, token_id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE enrollment_tokens SET used_at = $1 WHERE id = $2 AND used_at IS NULL")
        .bind(now)
        .bind(token_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}
