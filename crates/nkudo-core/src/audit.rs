//! Append-only hash-chained audit log (§4.7, invariant I5).
//!
//! `entry_hash = SHA-256(prev_hash ‖ canonicalJSON(event))`, where canonical
//! JSON sorts object keys and renders timestamps as RFC 3339 UTC. The first
//! row in the chain uses a fixed all-zero `prev_hash`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use nkudo_storage::models::{ActorType, AuditEvent};

use crate::error::AuditError;

/// Fixed zero-hash used as `prev_hash` for the very first event in the chain.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// The fields that participate in hashing. Field declaration order here is
/// irrelevant to the hash: [`compute_entry_hash`] round-trips this struct
/// through `serde_json::Value` before hashing, and `Value`'s map type is a
/// `BTreeMap` (the `preserve_order` feature is not enabled anywhere in this
/// workspace), so the bytes actually hashed always have keys in sorted
/// order regardless of how this struct is declared. Only the *set* of
/// fields must stay identical between append time and verify time.
#[derive(Serialize)]
struct HashedFields<'a> {
    tenant_id: Uuid,
    site_id: Option<Uuid>,
    actor_type: ActorType,
    actor_ref: &'a str,
    action: &'a str,
    resource_type: &'a str,
    resource_id: &'a str,
    occurred_at: DateTime<Utc>,
}

/// One event about to be appended, before its hash is computed.
#[derive(Clone)]
pub struct AuditEventInput {
    pub tenant_id: Uuid,
    pub site_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub actor_ref: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Compute `entry_hash` for one event given its predecessor's hash.
///
/// # Errors
///
/// Returns [`AuditError`] only in the (practically unreachable) case that
/// the event fields fail to serialize.
fn compute_entry_hash(prev_hash: &str, event: &HashedFields<'_>) -> Result<String, AuditError> {
    // Serializing the struct directly would hash fields in declaration
    // order; routing through `Value` first (its map is a sorted `BTreeMap`)
    // is what actually makes this canonical JSON.
    let value = serde_json::to_value(event).map_err(|e| AuditError::Storage(
        nkudo_storage::StoreError::Internal(format!("audit event serialization failed: {e}")),
    ))?;
    let canonical = serde_json::to_vec(&value).map_err(|e| AuditError::Storage(
        nkudo_storage::StoreError::Internal(format!("audit event serialization failed: {e}")),
    ))?;

    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

/// Append one event to the chain under the storage layer's append lock.
///
/// # Errors
///
/// Returns [`AuditError::Storage`] on a database failure.
pub async fn append_event(pool: &PgPool, input: AuditEventInput) -> Result<AuditEvent, AuditError> {
    let (tx, prev_hash) = nkudo_storage::audit::begin_append(pool).await?;
    let prev_hash = prev_hash.unwrap_or_else(|| ZERO_HASH.to_owned());

    let fields = HashedFields {
        tenant_id: input.tenant_id,
        site_id: input.site_id,
        actor_type: input.actor_type,
        actor_ref: &input.actor_ref,
        action: &input.action,
        resource_type: &input.resource_type,
        resource_id: &input.resource_id,
        occurred_at: input.occurred_at,
    };
    let entry_hash = compute_entry_hash(&prev_hash, &fields)?;

    let event = nkudo_storage::audit::insert_event(
        tx,
        input.tenant_id,
        input.site_id,
        input.actor_type,
        &input.actor_ref,
        &input.action,
        &input.resource_type,
        &input.resource_id,
        &prev_hash,
        &entry_hash,
        input.occurred_at,
    )
    .await?;

    Ok(event)
}

/// The outcome of walking the chain once.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub events_checked: u64,
    pub first_mismatch_sequence: Option<i64>,
}

/// Walk the entire chain in insertion order, recomputing each hash and
/// comparing it against the stored value. On the first mismatch, flips
/// `chain_valid = false` on that row and every row after it (since a
/// corrupted row invalidates every descendant's `prev_hash` assumption),
/// and reports the failing sequence once.
///
/// # Errors
///
/// Returns [`AuditError::Storage`] on a database failure.
pub async fn verify_chain(pool: &PgPool) -> Result<VerifyReport, AuditError> {
    let events = nkudo_storage::audit::list_all_events_ordered(pool).await?;

    let mut report = VerifyReport::default();
    let mut expected_prev = ZERO_HASH.to_owned();
    let mut tainted = false;

    for event in &events {
        report.events_checked += 1;

        let fields = HashedFields {
            tenant_id: event.tenant_id,
            site_id: event.site_id,
            actor_type: event.actor_type,
            actor_ref: &event.actor_ref,
            action: &event.action,
            resource_type: &event.resource_type,
            resource_id: &event.resource_id,
            occurred_at: event.occurred_at,
        };
        let recomputed = compute_entry_hash(&expected_prev, &fields)?;

        let mismatch = tainted || recomputed != event.entry_hash || event.prev_hash != expected_prev;
        if mismatch {
            if !tainted {
                report.first_mismatch_sequence = Some(event.sequence);
                tainted = true;
            }
            if event.chain_valid {
                nkudo_storage::audit::mark_chain_invalid(pool, event.id, event.tenant_id).await?;
            }
        }

        expected_prev = event.entry_hash.clone();
    }

    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_fields(occurred_at: DateTime<Utc>) -> HashedFields<'static> {
        HashedFields {
            tenant_id: Uuid::nil(),
            site_id: None,
            actor_type: ActorType::System,
            actor_ref: "sweeper",
            action: "AGENT_OFFLINE",
            resource_type: "agent",
            resource_id: "00000000-0000-0000-0000-000000000001",
            occurred_at,
        }
    }

    #[test]
    fn compute_entry_hash_is_deterministic() {
        let occurred_at = Utc::now();
        let fields = sample_fields(occurred_at);
        let a = compute_entry_hash(ZERO_HASH, &fields).expect("hash a");
        let fields = sample_fields(occurred_at);
        let b = compute_entry_hash(ZERO_HASH, &fields).expect("hash b");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn compute_entry_hash_changes_with_prev_hash() {
        let fields = sample_fields(Utc::now());
        let a = compute_entry_hash(ZERO_HASH, &fields).expect("hash a");
        let b = compute_entry_hash("a".repeat(64).as_str(), &fields).expect("hash b");
        assert_ne!(a, b);
    }

    #[test]
    fn compute_entry_hash_changes_with_any_field() {
        let occurred_at = Utc::now();
        let base = compute_entry_hash(ZERO_HASH, &sample_fields(occurred_at)).expect("base");

        let mut other = sample_fields(occurred_at);
        other.action = "AGENT_DEGRADED";
        let changed = compute_entry_hash(ZERO_HASH, &other).expect("changed");

        assert_ne!(base, changed);
    }
}
