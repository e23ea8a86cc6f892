//! Site repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ConnectivityState, Site};

/// Create a site under a tenant.
///
/// # Errors
///
/// Returns [`StoreError::Conflict`] if `(tenant_id, name)` or
/// `(tenant_id, external_key)` already exists.
pub async fn create_site(
    pool: &PgPool,
    tenant_id: Uuid,
    name: &str,
    external_key: Option<&str>,
) -> Result<Site, StoreError> {
    let site = sqlx::query_as::<_, Site>(
        r"
        INSERT INTO sites (tenant_id, name, external_key)
        VALUES ($1, $2, $3)
        RETURNING id, tenant_id, name, external_key, connectivity_state,
                  last_heartbeat_at, created_at
        ",
    )
    .bind(tenant_id)
    .bind(name)
    .bind(external_key)
    .fetch_one(pool)
    .await?;

    Ok(site)
}

/// Fetch a site scoped to its tenant.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if no such site exists for that tenant.
pub async fn get_site(pool: &PgPool, tenant_id: Uuid, site_id: Uuid) -> Result<Site, StoreError> {
    let site = sqlx::query_as::<_, Site>(
        r"
        SELECT id, tenant_id, name, external_key, connectivity_state,
               last_heartbeat_at, created_at
        FROM sites WHERE id = $1 AND tenant_id = $2
        ",
    )
    .bind(site_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("site {site_id} not found")))?;

    Ok(site)
}

/// Recompute and persist a site's `connectivity_state` from its agents'
/// current states: `ONLINE` if every agent is online, `OFFLINE` if none
/// are, `PARTIAL` otherwise. A site with zero agents is `OFFLINE`.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn recompute_connectivity_state(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    observed_at: DateTime<Utc>,
) -> Result<ConnectivityState, StoreError> {
    let (total, online): (i64, i64) = sqlx::query_as(
        r"
        SELECT count(*), count(*) FILTER (WHERE state = 'ONLINE')
        FROM agents WHERE tenant_id = $1 AND site_id = $2
        ",
    )
    .bind(tenant_id)
    .bind(site_id)
    .fetch_one(pool)
    .await?;

    let state = if total == 0 || online == 0 {
        ConnectivityState::Offline
    } else if online == total {
        ConnectivityState::Online
    } else {
        ConnectivityState::Partial
    };

    sqlx::query(
        r"
        UPDATE sites SET connectivity_state = $1, last_heartbeat_at = $2
        WHERE id = $3 AND tenant_id = $4
        ",
    )
    .bind(state)
    .bind(observed_at)
    .bind(site_id)
    .bind(tenant_id)
    .execute(pool)
    .await?;

    Ok(state)
}
