//! Enrollment pipeline (§4.2): one-time token → CSR → client certificate.
//!
//! The CSR's subject common name is expected to equal the hostname the
//! caller is enrolling — at first-issuance time no agent identity exists
//! yet for the CN to reference, so the hostname stands in as "the
//! enrollment subject" named in §4.2.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nkudo_storage::enrollment::TokenConsumption;
use nkudo_storage::host::HostFacts;
use nkudo_storage::models::{Agent, ActorType, CertificateHistoryEntry, Host};
use nkudo_storage::token_store::TokenLookup;

use crate::admin::{generate_secret, hash_secret};
use crate::audit::{self, AuditEventInput};
use crate::error::{EnrollmentError, PkiError};
use crate::pki::{self, CaMaterial};

/// Everything the caller submits to `POST /enroll`.
pub struct EnrollmentRequest<'a> {
    pub token: &'a str,
    pub csr_pem: &'a str,
    pub hostname: &'a str,
    pub host_facts: HostFacts,
    pub agent_version: &'a str,
    pub os: &'a str,
    pub arch: &'a str,
}

/// Everything `POST /enroll` hands back on success (§4.2 step 3).
pub struct EnrollmentResponse {
    pub certificate_pem: String,
    pub ca_chain_pem: String,
    pub refresh_token: String,
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub host: Host,
    pub agent: Agent,
    pub certificate: CertificateHistoryEntry,
}

/// Run the full enrollment pipeline for a presented one-time token.
///
/// # Errors
///
/// Returns [`EnrollmentError::TokenInvalid`] / `TokenUsed` / `TokenExpired`
/// per §4.2 step 1, [`EnrollmentError::InvalidRequest`] if the CSR fails CA
/// validation, or [`EnrollmentError::Storage`] on a database failure. A
/// failure after token lookup does not consume the token unless the
/// consuming write itself committed (§4.2: "fails atomically ... leaves the
/// token unused unless it was found invalid or expired").
pub async fn enroll(
    pool: &PgPool,
    ca: &CaMaterial,
    cert_ttl_days: i64,
    request: EnrollmentRequest<'_>,
    now: DateTime<Utc>,
) -> Result<EnrollmentResponse, EnrollmentError> {
    let token_hash = hash_secret(request.token);

    let token = match nkudo_storage::token_store::find_by_hash(pool, &token_hash).await? {
        TokenLookup::NotFound => return Err(EnrollmentError::TokenInvalid),
        TokenLookup::Found(t) => t,
    };
    if token.used_at.is_some() {
        return Err(EnrollmentError::TokenUsed);
    }
    if token.expires_at <= now {
        return Err(EnrollmentError::TokenExpired);
    }

    let issued = pki::issue_certificate(ca, request.csr_pem, request.hostname, cert_ttl_days, now)
        .map_err(|e| match e {
            PkiError::InvalidCsr { reason } => EnrollmentError::InvalidRequest { reason },
            other => EnrollmentError::Pki(other),
        })?;

    let refresh_token = generate_secret();
    let refresh_token_hash = hash_secret(&refresh_token);

    let (consumption, host, agent, certificate) = nkudo_storage::enrollment::complete_enrollment(
        pool,
        token.id,
        token.tenant_id,
        token.site_id,
        request.hostname,
        &request.host_facts,
        &refresh_token_hash,
        request.agent_version,
        request.os,
        request.arch,
        &issued.serial,
        issued.issued_at,
        issued.expires_at,
        now,
    )
    .await
    .map_err(|e| match e {
        nkudo_storage::StoreError::Conflict(_) => EnrollmentError::TokenUsed,
        other => EnrollmentError::Storage(other),
    })?;

    debug_assert!(matches!(consumption, TokenConsumption::Consumed));

    audit::append_event(
        pool,
        AuditEventInput {
            tenant_id: token.tenant_id,
            site_id: Some(token.site_id),
            actor_type: ActorType::Agent,
            actor_ref: agent.id.to_string(),
            action: "AGENT_ENROLLED".to_owned(),
            resource_type: "agent".to_owned(),
            resource_id: agent.id.to_string(),
            occurred_at: now,
        },
    )
    .await
    .map_err(|e| EnrollmentError::Storage(nkudo_storage::StoreError::Internal(e.to_string())))?;

    Ok(EnrollmentResponse {
        certificate_pem: issued.certificate_pem,
        ca_chain_pem: issued.ca_chain_pem,
        refresh_token,
        tenant_id: token.tenant_id,
        site_id: token.site_id,
        host,
        agent,
        certificate,
    })
}
