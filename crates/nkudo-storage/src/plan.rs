//! Plan, plan-action, and execution repository functions — the leasing
//! core of the control plane.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Execution, ExecutionState, OperationType, Plan, PlanAction, PlanStatus};

/// One action as submitted in a new plan.
#[derive(Debug, Clone)]
pub struct PlanActionInput {
    pub operation_id: String,
    pub operation_type: OperationType,
    pub vm_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

/// Submit a plan, or return the existing one if `idempotency_key` has
/// already been used for this tenant.
///
/// Runs as a single transaction: looks up `(tenant_id, idempotency_key)`
/// under `FOR UPDATE` first so two concurrent submissions of the same key
/// cannot both insert. Returns `(plan, executions, deduplicated)`.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn submit_plan(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    idempotency_key: &str,
    client_request_id: Option<&str>,
    actions: &[PlanActionInput],
) -> Result<(Plan, Vec<Execution>, bool), StoreError> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, Plan>(
        r"
        SELECT id, tenant_id, site_id, idempotency_key, client_request_id, plan_version,
               status, leased_by_agent_id, lease_expires_at, requested_at, started_at, completed_at
        FROM plans WHERE tenant_id = $1 AND idempotency_key = $2
        FOR UPDATE
        ",
    )
    .bind(tenant_id)
    .bind(idempotency_key)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(plan) = existing {
        let executions = sqlx::query_as::<_, Execution>(
            r"
            SELECT id, tenant_id, plan_id, operation_id, agent_id, host_id, vm_id, state,
                   error_code, error_message, started_at, completed_at
            FROM executions WHERE tenant_id = $1 AND plan_id = $2
            ",
        )
        .bind(tenant_id)
        .bind(plan.id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        return Ok((plan, executions, true));
    }

    let next_version: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(plan_version), 0) + 1 FROM plans WHERE tenant_id = $1 AND site_id = $2",
    )
    .bind(tenant_id)
    .bind(site_id)
    .fetch_one(&mut *tx)
    .await?;

    let plan = sqlx::query_as::<_, Plan>(
        r"
        INSERT INTO plans (tenant_id, site_id, idempotency_key, client_request_id, plan_version, status)
        VALUES ($1, $2, $3, $4, $5, 'PENDING')
        RETURNING id, tenant_id, site_id, idempotency_key, client_request_id, plan_version,
                  status, leased_by_agent_id, lease_expires_at, requested_at, started_at, completed_at
        ",
    )
    .bind(tenant_id)
    .bind(site_id)
    .bind(idempotency_key)
    .bind(client_request_id)
    .bind(next_version)
    .fetch_one(&mut *tx)
    .await?;

    let mut executions = Vec::with_capacity(actions.len());
    for (index, action) in actions.iter().enumerate() {
        sqlx::query_as::<_, PlanAction>(
            r"
            INSERT INTO plan_actions (tenant_id, plan_id, operation_id, operation_type, vm_id, payload, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, tenant_id, plan_id, operation_id, operation_type, vm_id, payload, sort_order
            ",
        )
        .bind(tenant_id)
        .bind(plan.id)
        .bind(&action.operation_id)
        .bind(action.operation_type)
        .bind(action.vm_id)
        .bind(&action.payload)
        .bind(index as i64)
        .fetch_one(&mut *tx)
        .await?;

        let execution = sqlx::query_as::<_, Execution>(
            r"
            INSERT INTO executions (tenant_id, plan_id, operation_id, vm_id, state)
            VALUES ($1, $2, $3, $4, 'PENDING')
            RETURNING id, tenant_id, plan_id, operation_id, agent_id, host_id, vm_id, state,
                      error_code, error_message, started_at, completed_at
            ",
        )
        .bind(tenant_id)
        .bind(plan.id)
        .bind(&action.operation_id)
        .bind(action.vm_id)
        .fetch_one(&mut *tx)
        .await?;

        executions.push(execution);
    }

    tx.commit().await?;
    Ok((plan, executions, false))
}

/// Atomically claim up to `limit` eligible plans for `site_id` on behalf of
/// `agent_id`, using `SELECT ... FOR UPDATE SKIP LOCKED` so concurrent
/// heartbeats from other agents never claim the same plan twice.
///
/// Eligible: `status = PENDING` or (`status = IN_PROGRESS` and the lease
/// has expired). Ordered by `requested_at ASC, plan_version ASC`.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn lease_next_plans(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    agent_id: Uuid,
    limit: i64,
    lease_ttl_secs: i64,
    now: DateTime<Utc>,
) -> Result<Vec<Plan>, StoreError> {
    let lease_expires_at = now + chrono::Duration::seconds(lease_ttl_secs);

    let plans = sqlx::query_as::<_, Plan>(
        r"
        UPDATE plans SET
            status = 'IN_PROGRESS',
            leased_by_agent_id = $1,
            lease_expires_at = $2,
            started_at = COALESCE(started_at, $3)
        WHERE id IN (
            SELECT id FROM plans
            WHERE tenant_id = $4 AND site_id = $5
              AND (status = 'PENDING' OR (status = 'IN_PROGRESS' AND lease_expires_at <= $3))
            ORDER BY requested_at ASC, plan_version ASC
            LIMIT $6
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, tenant_id, site_id, idempotency_key, client_request_id, plan_version,
                  status, leased_by_agent_id, lease_expires_at, requested_at, started_at, completed_at
        ",
    )
    .bind(agent_id)
    .bind(lease_expires_at)
    .bind(now)
    .bind(tenant_id)
    .bind(site_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(plans)
}

/// Read-only projection of the plans currently leased to `agent_id` —
/// backs `GET /plans/next`, which never mutates a lease.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn list_leased_plans(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    agent_id: Uuid,
) -> Result<Vec<Plan>, StoreError> {
    let plans = sqlx::query_as::<_, Plan>(
        r"
        SELECT id, tenant_id, site_id, idempotency_key, client_request_id, plan_version,
               status, leased_by_agent_id, lease_expires_at, requested_at, started_at, completed_at
        FROM plans
        WHERE tenant_id = $1 AND site_id = $2 AND leased_by_agent_id = $3 AND status = 'IN_PROGRESS'
        ORDER BY requested_at ASC, plan_version ASC
        ",
    )
    .bind(tenant_id)
    .bind(site_id)
    .bind(agent_id)
    .fetch_all(pool)
    .await?;

    Ok(plans)
}

/// Fetch the ordered actions of a plan.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn list_plan_actions(
    pool: &PgPool,
    tenant_id: Uuid,
    plan_id: Uuid,
) -> Result<Vec<PlanAction>, StoreError> {
    let actions = sqlx::query_as::<_, PlanAction>(
        r"
        SELECT id, tenant_id, plan_id, operation_id, operation_type, vm_id, payload, sort_order
        FROM plan_actions WHERE tenant_id = $1 AND plan_id = $2 ORDER BY sort_order ASC
        ",
    )
    .bind(tenant_id)
    .bind(plan_id)
    .fetch_all(pool)
    .await?;

    Ok(actions)
}

/// A plan action joined with the `id` of its corresponding `Execution` row
/// (unique per `(plan_id, operation_id)`, §3 invariant I3). The agent has
/// no other way to learn an execution id — it only ever sees `operation_id`
/// — so this is what lets the dispatcher stream per-action `ExecutionLog`
/// entries (§4.6, §6 `/logs`) against the right row.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PlanActionWithExecution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub operation_id: String,
    pub operation_type: OperationType,
    pub vm_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub sort_order: i64,
    pub execution_id: Uuid,
}

/// Like [`list_plan_actions`] but also resolves each action's execution id.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn list_plan_actions_with_execution_ids(
    pool: &PgPool,
    tenant_id: Uuid,
    plan_id: Uuid,
) -> Result<Vec<PlanActionWithExecution>, StoreError> {
    let actions = sqlx::query_as::<_, PlanActionWithExecution>(
        r"
        SELECT a.id, a.tenant_id, a.plan_id, a.operation_id, a.operation_type, a.vm_id,
               a.payload, a.sort_order, e.id AS execution_id
        FROM plan_actions a
        JOIN executions e ON e.tenant_id = a.tenant_id AND e.plan_id = a.plan_id
            AND e.operation_id = a.operation_id
        WHERE a.tenant_id = $1 AND a.plan_id = $2
        ORDER BY a.sort_order ASC
        ",
    )
    .bind(tenant_id)
    .bind(plan_id)
    .fetch_all(pool)
    .await?;

    Ok(actions)
}

/// Fetch a single plan scoped to its tenant.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if no such plan exists.
pub async fn get_plan(pool: &PgPool, tenant_id: Uuid, plan_id: Uuid) -> Result<Plan, StoreError> {
    let plan = sqlx::query_as::<_, Plan>(
        r"
        SELECT id, tenant_id, site_id, idempotency_key, client_request_id, plan_version,
               status, leased_by_agent_id, lease_expires_at, requested_at, started_at, completed_at
        FROM plans WHERE id = $1 AND tenant_id = $2
        ",
    )
    .bind(plan_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("plan {plan_id} not found")))?;

    Ok(plan)
}

/// One action's reported outcome, keyed by `operation_id` per §4.3.
#[derive(Debug, Clone)]
pub struct ActionResultReport {
    pub operation_id: String,
    pub ok: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub host_id: Option<Uuid>,
}

/// Apply a batch of per-action results to a plan's executions, then
/// recompute and persist the plan's own status: `SUCCEEDED` if every
/// execution is `SUCCEEDED`, `FAILED` if any is `FAILED`, otherwise left
/// `IN_PROGRESS` with a refreshed lease.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure, or
/// [`StoreError::NotFound`] if the plan does not exist.
pub async fn report_results(
    pool: &PgPool,
    tenant_id: Uuid,
    plan_id: Uuid,
    agent_id: Uuid,
    results: &[ActionResultReport],
    lease_ttl_secs: i64,
    now: DateTime<Utc>,
) -> Result<Plan, StoreError> {
    let mut tx = pool.begin().await?;

    for result in results {
        let state = if result.ok {
            ExecutionState::Succeeded
        } else {
            ExecutionState::Failed
        };

        sqlx::query(
            r"
            UPDATE executions SET
                state = $1, agent_id = $2, host_id = $3, error_code = $4, error_message = $5,
                started_at = $6, completed_at = $7
            WHERE tenant_id = $8 AND plan_id = $9 AND operation_id = $10
            ",
        )
        .bind(state)
        .bind(agent_id)
        .bind(result.host_id)
        .bind(&result.error_code)
        .bind(&result.error_message)
        .bind(result.started_at)
        .bind(result.finished_at)
        .bind(tenant_id)
        .bind(plan_id)
        .bind(&result.operation_id)
        .execute(&mut *tx)
        .await?;
    }

    let (total, succeeded, failed): (i64, i64, i64) = sqlx::query_as(
        r"
        SELECT count(*), count(*) FILTER (WHERE state = 'SUCCEEDED'),
               count(*) FILTER (WHERE state = 'FAILED')
        FROM executions WHERE tenant_id = $1 AND plan_id = $2
        ",
    )
    .bind(tenant_id)
    .bind(plan_id)
    .fetch_one(&mut *tx)
    .await?;

    let new_status = if failed > 0 {
        PlanStatus::Failed
    } else if succeeded == total {
        PlanStatus::Succeeded
    } else {
        PlanStatus::InProgress
    };

    let lease_expires_at = now + chrono::Duration::seconds(lease_ttl_secs);

    let plan = if matches!(new_status, PlanStatus::InProgress) {
        sqlx::query_as::<_, Plan>(
            r"
            UPDATE plans SET lease_expires_at = $1
            WHERE id = $2 AND tenant_id = $3
            RETURNING id, tenant_id, site_id, idempotency_key, client_request_id, plan_version,
                      status, leased_by_agent_id, lease_expires_at, requested_at, started_at, completed_at
            ",
        )
        .bind(lease_expires_at)
        .bind(plan_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("plan {plan_id} not found")))?
    } else {
        sqlx::query_as::<_, Plan>(
            r"
            UPDATE plans SET
                status = $1, leased_by_agent_id = NULL, lease_expires_at = NULL, completed_at = $2
            WHERE id = $3 AND tenant_id = $4
            RETURNING id, tenant_id, site_id, idempotency_key, client_request_id, plan_version,
                      status, leased_by_agent_id, lease_expires_at, requested_at, started_at, completed_at
            ",
        )
        .bind(new_status)
        .bind(now)
        .bind(plan_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("plan {plan_id} not found")))?
    };

    tx.commit().await?;
    Ok(plan)
}

/// Cancel a plan: mark it `CANCELLED`, clear its lease, and fail every
/// execution that has not already reached a terminal state with
/// `error_code = CANCELLED`.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if the plan does not exist.
pub async fn cancel_plan(pool: &PgPool, tenant_id: Uuid, plan_id: Uuid, now: DateTime<Utc>) -> Result<Plan, StoreError> {
    let mut tx = pool.begin().await?;

    let plan = sqlx::query_as::<_, Plan>(
        r"
        UPDATE plans SET
            status = 'CANCELLED', leased_by_agent_id = NULL, lease_expires_at = NULL, completed_at = $1
        WHERE id = $2 AND tenant_id = $3 AND status NOT IN ('SUCCEEDED', 'FAILED', 'CANCELLED')
        RETURNING id, tenant_id, site_id, idempotency_key, client_request_id, plan_version,
                  status, leased_by_agent_id, lease_expires_at, requested_at, started_at, completed_at
        ",
    )
    .bind(now)
    .bind(plan_id)
    .bind(tenant_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("plan {plan_id} not found or already terminal")))?;

    sqlx::query(
        r"
        UPDATE executions SET state = 'FAILED', error_code = 'CANCELLED', completed_at = $1
        WHERE tenant_id = $2 AND plan_id = $3 AND state NOT IN ('SUCCEEDED', 'FAILED')
        ",
    )
    .bind(now)
    .bind(tenant_id)
    .bind(plan_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(plan)
}

/// List executions for a site, newest first, for operator-facing listing.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn list_site_executions(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    limit: i64,
) -> Result<Vec<Execution>, StoreError> {
    let executions = sqlx::query_as::<_, Execution>(
        r"
        SELECT e.id, e.tenant_id, e.plan_id, e.operation_id, e.agent_id, e.host_id, e.vm_id,
               e.state, e.error_code, e.error_message, e.started_at, e.completed_at
        FROM executions e
        JOIN plans p ON p.id = e.plan_id AND p.tenant_id = e.tenant_id
        WHERE e.tenant_id = $1 AND p.site_id = $2
        ORDER BY p.requested_at DESC
        LIMIT $3
        ",
    )
    .bind(tenant_id)
    .bind(site_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(executions)
}

/// Clear the lease of any plan still `IN_PROGRESS` and leased by
/// `agent_id`, without touching its executions — used when an agent goes
/// `OFFLINE` or is unenrolled, per §4.5 and §4.2.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn clear_leases_for_agent(pool: &PgPool, tenant_id: Uuid, agent_id: Uuid) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r"
        UPDATE plans
        SET status = 'PENDING', leased_by_agent_id = NULL, lease_expires_at = NULL, started_at = NULL
        WHERE tenant_id = $1 AND leased_by_agent_id = $2 AND status = 'IN_PROGRESS'
        ",
    )
    .bind(tenant_id)
    .bind(agent_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Clear the lease of every plan whose `lease_expires_at` has passed,
/// across all tenants — the sweeper's third pass.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn clear_expired_leases(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r"
        UPDATE plans
        SET status = 'PENDING', leased_by_agent_id = NULL, lease_expires_at = NULL, started_at = NULL
        WHERE status = 'IN_PROGRESS' AND lease_expires_at < $1
        ",
    )
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
