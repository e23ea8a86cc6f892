//! Tenant administration: tenant/site creation and enrollment-token issuance.
//!
//! These are the operator-facing entry points that exist only to set up the
//! identities the rest of the system (enrollment, heartbeat, leasing) then
//! operates on. Validation that belongs nowhere else in the data model lives
//! here — e.g. the `data_retention_days >= 7` floor (§3).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use nkudo_storage::models::{EnrollmentToken, Site, Tenant};

use crate::error::AdminError;

/// Minimum retention floor enforced at tenant creation (§3).
pub const MIN_DATA_RETENTION_DAYS: i32 = 7;

/// Number of random bytes backing a plaintext enrollment token before
/// hex-encoding (64 hex chars, comfortably above the 32-char entropy floor
/// from §6).
const TOKEN_ENTROPY_BYTES: usize = 32;

/// SHA-256 hex digest of a secret, used uniformly for enrollment tokens and
/// agent refresh tokens — neither is ever stored in plaintext.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a fresh opaque secret with [`TOKEN_ENTROPY_BYTES`] of entropy,
/// hex-encoded (ASCII, well above the 32-char floor from §6).
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Create a tenant.
///
/// # Errors
///
/// Returns [`AdminError::InvalidRequest`] if `data_retention_days` is below
/// the 7-day floor, or [`AdminError::Storage`] on a database failure (e.g.
/// a duplicate `slug`).
pub async fn create_tenant(
    pool: &PgPool,
    slug: &str,
    name: &str,
    primary_region: &str,
    data_retention_days: i32,
) -> Result<Tenant, AdminError> {
    if data_retention_days < MIN_DATA_RETENTION_DAYS {
        return Err(AdminError::InvalidRequest {
            reason: format!(
                "data_retention_days must be >= {MIN_DATA_RETENTION_DAYS}, got {data_retention_days}"
            ),
        });
    }
    if slug.is_empty() || name.is_empty() {
        return Err(AdminError::InvalidRequest {
            reason: "slug and name are required".to_owned(),
        });
    }

    let tenant =
        nkudo_storage::tenant::create_tenant(pool, slug, name, primary_region, data_retention_days)
            .await?;
    Ok(tenant)
}

/// Create a site under a tenant.
///
/// # Errors
///
/// Returns [`AdminError::InvalidRequest`] if `name` is empty, or
/// [`AdminError::Storage`] on a uniqueness conflict.
pub async fn create_site(
    pool: &PgPool,
    tenant_id: Uuid,
    name: &str,
    external_key: Option<&str>,
) -> Result<Site, AdminError> {
    if name.is_empty() {
        return Err(AdminError::InvalidRequest {
            reason: "site name is required".to_owned(),
        });
    }

    let site = nkudo_storage::site::create_site(pool, tenant_id, name, external_key).await?;
    Ok(site)
}

/// A freshly minted enrollment token — the plaintext is returned exactly
/// once and never persisted (only its hash is).
pub struct IssuedToken {
    pub record: EnrollmentToken,
    pub plaintext: String,
}

/// Issue a one-time enrollment token for a site, valid for `ttl_hours`.
///
/// # Errors
///
/// Returns [`AdminError::Storage`] on a database failure.
pub async fn issue_enrollment_token(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> Result<IssuedToken, AdminError> {
    let plaintext = generate_secret();
    let token_hash = hash_secret(&plaintext);
    let expires_at = now + ChronoDuration::hours(ttl_hours.max(1));

    let record = nkudo_storage::token_store::create_token(pool, tenant_id, site_id, &token_hash, expires_at)
        .await?;

    Ok(IssuedToken { record, plaintext })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn hash_secret_is_deterministic_and_not_plaintext() {
        let digest = hash_secret("a-secret-token");
        assert_eq!(digest, hash_secret("a-secret-token"));
        assert_ne!(digest, "a-secret-token");
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn generate_secret_is_unique_and_meets_entropy_floor() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert!(a.len() >= 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
