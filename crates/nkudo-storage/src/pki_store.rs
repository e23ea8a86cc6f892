//! Certificate history and CRL repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{CertificateHistoryEntry, CrlEntry};

/// Append a certificate-history row for a freshly issued certificate.
///
/// # Errors
///
/// Returns [`StoreError::Conflict`] if the serial already exists (sampled
/// from the same RNG twice — astronomically unlikely, but checked).
pub async fn record_issued_certificate(
    pool: &PgPool,
    tenant_id: Uuid,
    agent_id: Uuid,
    serial: &str,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<CertificateHistoryEntry, StoreError> {
    let entry = sqlx::query_as::<_, CertificateHistoryEntry>(
        r"
        INSERT INTO certificate_history (tenant_id, agent_id, serial, issued_at, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, tenant_id, agent_id, serial, issued_at, expires_at, revoked_at
        ",
    )
    .bind(tenant_id)
    .bind(agent_id)
    .bind(serial)
    .bind(issued_at)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    Ok(entry)
}

/// Revoke a certificate serial: stamp `certificate_history.revoked_at` and
/// insert a `CRLEntry`. Idempotent — revoking an already-revoked serial is
/// not an error.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn revoke_certificate(
    pool: &PgPool,
    tenant_id: Uuid,
    agent_id: Uuid,
    serial: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE certificate_history SET revoked_at = $1 WHERE serial = $2 AND revoked_at IS NULL")
        .bind(now)
        .bind(serial)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r"
        INSERT INTO crl_entries (serial, revoked_at, reason, agent_id, tenant_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (serial) DO NOTHING
        ",
    )
    .bind(serial)
    .bind(now)
    .bind(reason)
    .bind(agent_id)
    .bind(tenant_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Check a single serial against the CRL — used at mTLS handshake verify
/// time when the short-TTL in-memory cache has expired or missed.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn is_revoked(pool: &PgPool, serial: &str) -> Result<bool, StoreError> {
    let found: Option<String> = sqlx::query_scalar("SELECT serial FROM crl_entries WHERE serial = $1")
        .bind(serial)
        .fetch_optional(pool)
        .await?;

    Ok(found.is_some())
}

/// Fetch the full CRL, for the signed-list endpoint and for warming the
/// in-memory cache on startup.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn list_crl(pool: &PgPool) -> Result<Vec<CrlEntry>, StoreError> {
    let entries = sqlx::query_as::<_, CrlEntry>(
        "SELECT serial, revoked_at, reason, agent_id, tenant_id FROM crl_entries ORDER BY revoked_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Fetch the most recent certificate-history row for an agent, used by
/// renewal to compute the outgoing serial's grace-period expiry.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if the agent has never been issued a
/// certificate.
pub async fn latest_certificate_for_agent(
    pool: &PgPool,
    tenant_id: Uuid,
    agent_id: Uuid,
) -> Result<CertificateHistoryEntry, StoreError> {
    let entry = sqlx::query_as::<_, CertificateHistoryEntry>(
        r"
        SELECT id, tenant_id, agent_id, serial, issued_at, expires_at, revoked_at
        FROM certificate_history WHERE tenant_id = $1 AND agent_id = $2
        ORDER BY issued_at DESC LIMIT 1
        ",
    )
    .bind(tenant_id)
    .bind(agent_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("no certificate history for agent {agent_id}")))?;

    Ok(entry)
}
