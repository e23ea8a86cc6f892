//! Audit event repository functions.
//!
//! Hash computation lives in `nkudo-core` (it is pure domain logic with no
//! database dependency); this module only provides the transactional
//! primitives the chain needs: a way to serialize appenders against each
//! other, and append-only reads/writes.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ActorType, AuditEvent};

/// Fixed advisory-lock key used to serialize concurrent audit appends so
/// that "read the tail hash, compute the next hash, insert" is effectively
/// atomic without needing a lockable row to exist yet.
const AUDIT_APPEND_LOCK_KEY: i64 = 0x6e6b_7564_6f5f_6175;

/// Begin a transaction and take the append lock. The caller computes the
/// next `entry_hash` from the returned tail hash and then calls
/// [`insert_event`] within the same transaction.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn begin_append(pool: &PgPool) -> Result<(Transaction<'static, Postgres>, Option<String>), StoreError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(AUDIT_APPEND_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let tail: Option<String> = sqlx::query_scalar(
        "SELECT entry_hash FROM audit_events ORDER BY sequence DESC LIMIT 1",
    )
    .fetch_optional(&mut *tx)
    .await?;

    Ok((tx, tail))
}

/// Insert one audit event row and commit the transaction opened by
/// [`begin_append`].
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
#[allow(clippy::too_many_arguments)]
pub async fn insert_event(
    mut tx: Transaction<'static, Postgres>,
    tenant_id: Uuid,
    site_id: Option<Uuid>,
    actor_type: ActorType,
    actor_ref: &str,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    prev_hash: &str,
    entry_hash: &str,
    occurred_at: DateTime<Utc>,
) -> Result<AuditEvent, StoreError> {
    let event = sqlx::query_as::<_, AuditEvent>(
        r"
        INSERT INTO audit_events (
            tenant_id, site_id, actor_type, actor_ref, action, resource_type,
            resource_id, prev_hash, entry_hash, occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id, tenant_id, site_id, actor_type, actor_ref, action, resource_type,
                  resource_id, prev_hash, entry_hash, chain_valid, occurred_at, sequence
        ",
    )
    .bind(tenant_id)
    .bind(site_id)
    .bind(actor_type)
    .bind(actor_ref)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(prev_hash)
    .bind(entry_hash)
    .bind(occurred_at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(event)
}

/// Walk the entire chain in insertion order, for the verifier job.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn list_all_events_ordered(pool: &PgPool) -> Result<Vec<AuditEvent>, StoreError> {
    let events = sqlx::query_as::<_, AuditEvent>(
        r"
        SELECT id, tenant_id, site_id, actor_type, actor_ref, action, resource_type,
               resource_id, prev_hash, entry_hash, chain_valid, occurred_at, sequence
        FROM audit_events ORDER BY sequence ASC
        ",
    )
    .fetch_all(pool)
    .await?;

    Ok(events)
}

/// List audit events for a single tenant, most recent first (operator
/// listing use — not the verifier's full-chain walk).
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn list_tenant_events(pool: &PgPool, tenant_id: Uuid, limit: i64) -> Result<Vec<AuditEvent>, StoreError> {
    let events = sqlx::query_as::<_, AuditEvent>(
        r"
        SELECT id, tenant_id, site_id, actor_type, actor_ref, action, resource_type,
               resource_id, prev_hash, entry_hash, chain_valid, occurred_at, sequence
        FROM audit_events WHERE tenant_id = $1 ORDER BY sequence DESC LIMIT $2
        ",
    )
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(events)
}

/// Flip `chain_valid = false` on a single row — the only mutation the
/// storage layer's append-only trigger permits.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn mark_chain_invalid(pool: &PgPool, id: Uuid, tenant_id: Uuid) -> Result<(), StoreError> {
    sqlx::query("UPDATE audit_events SET chain_valid = false WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;
    Ok(())
}
