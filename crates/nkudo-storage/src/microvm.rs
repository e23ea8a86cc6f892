//! MicroVM repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{MicroVm, MicroVmState};

/// One MicroVM inventory line as reported by an agent's heartbeat.
#[derive(Debug, Clone)]
pub struct MicroVmReport {
    pub name: String,
    pub state: MicroVmState,
    pub vcpu_count: i32,
    pub memory_mib: i32,
}

/// Upsert a MicroVM row by `(tenant_id, site_id, name)`. Records
/// `last_transition_at` only when `state` actually changes.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn reconcile_vm(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    host_id: Uuid,
    report: &MicroVmReport,
    observed_at: DateTime<Utc>,
) -> Result<MicroVm, StoreError> {
    let vm = sqlx::query_as::<_, MicroVm>(
        r"
        INSERT INTO microvms (tenant_id, site_id, host_id, name, state, vcpu_count, memory_mib, last_transition_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (tenant_id, site_id, name) DO UPDATE SET
            host_id = excluded.host_id,
            state = excluded.state,
            vcpu_count = excluded.vcpu_count,
            memory_mib = excluded.memory_mib,
            last_transition_at = CASE
                WHEN microvms.state != excluded.state THEN excluded.last_transition_at
                ELSE microvms.last_transition_at
            END
        RETURNING id, tenant_id, site_id, host_id, name, state, vcpu_count,
                  memory_mib, last_transition_at, created_at
        ",
    )
    .bind(tenant_id)
    .bind(site_id)
    .bind(host_id)
    .bind(&report.name)
    .bind(report.state)
    .bind(report.vcpu_count)
    .bind(report.memory_mib)
    .bind(observed_at)
    .fetch_one(pool)
    .await?;

    Ok(vm)
}

/// Fetch a MicroVM by id, scoped to tenant.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if no such VM exists.
pub async fn get_vm(pool: &PgPool, tenant_id: Uuid, vm_id: Uuid) -> Result<MicroVm, StoreError> {
    let vm = sqlx::query_as::<_, MicroVm>(
        r"
        SELECT id, tenant_id, site_id, host_id, name, state, vcpu_count,
               memory_mib, last_transition_at, created_at
        FROM microvms WHERE id = $1 AND tenant_id = $2
        ",
    )
    .bind(vm_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("microvm {vm_id} not found")))?;

    Ok(vm)
}
