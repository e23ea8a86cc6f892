//! Tenant repository functions.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::Tenant;

/// Create a tenant.
///
/// # Errors
///
/// Returns [`StoreError::Conflict`] if the slug is already taken.
pub async fn create_tenant(
    pool: &PgPool,
    slug: &str,
    name: &str,
    primary_region: &str,
    data_retention_days: i32,
) -> Result<Tenant, StoreError> {
    let tenant = sqlx::query_as::<_, Tenant>(
        r"
        INSERT INTO tenants (slug, name, primary_region, data_retention_days)
        VALUES ($1, $2, $3, $4)
        RETURNING id, slug, name, primary_region, data_retention_days, created_at
        ",
    )
    .bind(slug)
    .bind(name)
    .bind(primary_region)
    .bind(data_retention_days)
    .fetch_one(pool)
    .await?;

    Ok(tenant)
}

/// Fetch a tenant by id.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if no such tenant exists.
pub async fn get_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Tenant, StoreError> {
    let tenant = sqlx::query_as::<_, Tenant>(
        r"
        SELECT id, slug, name, primary_region, data_retention_days, created_at
        FROM tenants WHERE id = $1
        ",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant_id} not found")))?;

    Ok(tenant)
}
