//! Certificate renewal and agent decommissioning (§4.2 `/renew`, `/unenroll`).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nkudo_storage::models::{Agent, AgentState, ActorType};

use crate::admin::{generate_secret, hash_secret};
use crate::audit::{self, AuditEventInput};
use crate::error::{IdentityError, PkiError};
use crate::pki::{self, CaMaterial, IssuedCertificate};

/// `POST /renew` request shape.
pub struct RenewalRequest<'a> {
    pub agent_id: Uuid,
    pub csr_pem: &'a str,
    pub refresh_token: &'a str,
    /// If true, a new refresh token is minted and returned; if false the
    /// existing one stays valid.
    pub rotate_refresh_token: bool,
}

/// `POST /renew` response.
pub struct RenewalResponse {
    pub issued: IssuedCertificate,
    pub refresh_token: Option<String>,
}

/// Rotate an agent's client certificate. The previous serial is left to
/// expire naturally at its own `expires_at` (the "grace" window of §4.2) —
/// it is not proactively revoked, only superseded in `agents.cert_serial`.
/// `tenant_id` comes from the caller's already-authenticated mTLS identity,
/// not from the request body, so a renewal can never target another
/// tenant's agent.
///
/// # Errors
///
/// Returns [`IdentityError::RefreshTokenInvalid`] if the refresh token does
/// not match, [`IdentityError::CertRevoked`] if the agent's current
/// certificate is already on the CRL, or [`IdentityError::Pki`] if the CSR
/// fails validation.
pub async fn renew(
    pool: &PgPool,
    ca: &CaMaterial,
    cert_ttl_days: i64,
    tenant_id: Uuid,
    request: RenewalRequest<'_>,
    now: DateTime<Utc>,
) -> Result<RenewalResponse, IdentityError> {
    let agent = nkudo_storage::agent::get_agent(pool, tenant_id, request.agent_id).await?;
    renew_for_agent(pool, ca, cert_ttl_days, &agent, request, now).await
}

async fn renew_for_agent(
    pool: &PgPool,
    ca: &CaMaterial,
    cert_ttl_days: i64,
    agent: &Agent,
    request: RenewalRequest<'_>,
    now: DateTime<Utc>,
) -> Result<RenewalResponse, IdentityError> {
    if hash_secret(request.refresh_token) != agent.refresh_token_hash {
        return Err(IdentityError::RefreshTokenInvalid);
    }

    if let Some(serial) = &agent.cert_serial {
        if nkudo_storage::pki_store::is_revoked(pool, serial).await? {
            return Err(IdentityError::CertRevoked);
        }
    }

    let host = nkudo_storage::host::get_host(pool, agent.tenant_id, agent.host_id).await?;

    let issued = pki::issue_certificate(ca, request.csr_pem, &host.hostname, cert_ttl_days, now)
        .map_err(|e| match e {
            PkiError::InvalidCsr { .. } => IdentityError::Pki(e),
            other => IdentityError::Pki(other),
        })?;

    nkudo_storage::pki_store::record_issued_certificate(
        pool,
        agent.tenant_id,
        agent.id,
        &issued.serial,
        issued.issued_at,
        issued.expires_at,
    )
    .await?;
    nkudo_storage::agent::set_cert_serial(pool, agent.tenant_id, agent.id, Some(&issued.serial)).await?;

    let refresh_token = if request.rotate_refresh_token {
        let fresh = generate_secret();
        nkudo_storage::agent::set_refresh_token_hash(pool, agent.tenant_id, agent.id, &hash_secret(&fresh))
            .await?;
        Some(fresh)
    } else {
        None
    };

    audit::append_event(
        pool,
        AuditEventInput {
            tenant_id: agent.tenant_id,
            site_id: Some(agent.site_id),
            actor_type: ActorType::Agent,
            actor_ref: agent.id.to_string(),
            action: "CERTIFICATE_RENEWED".to_owned(),
            resource_type: "agent".to_owned(),
            resource_id: agent.id.to_string(),
            occurred_at: now,
        },
    )
    .await
    .map_err(|e| IdentityError::Storage(nkudo_storage::StoreError::Internal(e.to_string())))?;

    Ok(RenewalResponse { issued, refresh_token })
}

/// Verify that `presented_serial` (read off the caller's mTLS handshake) is
/// both the agent's current certificate and not on the CRL. This is the
/// serial/CRL cross-check §4.1 requires at "every mTLS handshake verify
/// step"; since `WebPkiClientVerifier` only validates the certificate chain
/// and never consults the CRL, every mTLS-only route that does not already
/// perform an equivalent check (heartbeat does this inline; renewal checks
/// the CRL above) must call this before acting on the request.
///
/// # Errors
///
/// Returns [`IdentityError::CertMismatch`] if `presented_serial` does not
/// match `agents.cert_serial`, [`IdentityError::CertRevoked`] if the
/// matching serial is on the CRL, or [`IdentityError::Storage`] if no such
/// agent exists.
pub async fn verify_agent_identity(
    pool: &PgPool,
    tenant_id: Uuid,
    agent_id: Uuid,
    presented_serial: &str,
) -> Result<(), IdentityError> {
    let agent = nkudo_storage::agent::get_agent(pool, tenant_id, agent_id).await?;

    match &agent.cert_serial {
        Some(serial) if serial == presented_serial => {}
        _ => return Err(IdentityError::CertMismatch),
    }

    if nkudo_storage::pki_store::is_revoked(pool, presented_serial).await? {
        return Err(IdentityError::CertRevoked);
    }

    Ok(())
}

/// Decommission an agent (§4.2 `/unenroll`): revoke its certificate, mark it
/// `OFFLINE`, clear any plan leases it holds, and emit `AGENT_UNENROLLED`.
///
/// # Errors
///
/// Returns [`IdentityError::Storage`] on a database failure.
pub async fn unenroll(pool: &PgPool, tenant_id: Uuid, agent_id: Uuid, now: DateTime<Utc>) -> Result<(), IdentityError> {
    let agent = nkudo_storage::agent::get_agent(pool, tenant_id, agent_id).await?;

    if let Some(serial) = &agent.cert_serial {
        nkudo_storage::pki_store::revoke_certificate(pool, tenant_id, agent_id, serial, "unenrolled", now).await?;
    }
    nkudo_storage::agent::set_cert_serial(pool, tenant_id, agent_id, None).await?;
    nkudo_storage::agent::set_state(pool, tenant_id, agent_id, AgentState::Offline).await?;
    nkudo_storage::plan::clear_leases_for_agent(pool, tenant_id, agent_id).await?;

    audit::append_event(
        pool,
        AuditEventInput {
            tenant_id,
            site_id: Some(agent.site_id),
            actor_type: ActorType::Agent,
            actor_ref: agent_id.to_string(),
            action: "AGENT_UNENROLLED".to_owned(),
            resource_type: "agent".to_owned(),
            resource_id: agent_id.to_string(),
            occurred_at: now,
        },
    )
    .await
    .map_err(|e| IdentityError::Storage(nkudo_storage::StoreError::Internal(e.to_string())))?;

    Ok(())
}
