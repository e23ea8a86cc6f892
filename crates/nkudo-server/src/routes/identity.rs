//! `POST /enroll`, `POST /renew`, `POST /unenroll` — the certificate
//! lifecycle endpoints of §4.2.

use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nkudo_core::enrollment::{self, EnrollmentRequest};
use nkudo_core::renewal::{self, RenewalRequest};
use nkudo_storage::host::HostFacts;

use crate::error::AppError;
use crate::mtls::ClientIdentity;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/enroll", post(enroll))
        .route("/renew", post(renew))
        .route("/unenroll", post(unenroll))
}

#[derive(Debug, Deserialize)]
pub struct HostFactsWire {
    pub cpu_cores_total: i32,
    pub memory_bytes_total: i64,
    pub storage_bytes_total: i64,
    pub kvm_available: bool,
    pub hypervisor_available: bool,
}

impl From<HostFactsWire> for HostFacts {
    fn from(w: HostFactsWire) -> Self {
        Self {
            cpu_cores_total: w.cpu_cores_total,
            memory_bytes_total: w.memory_bytes_total,
            storage_bytes_total: w.storage_bytes_total,
            kvm_available: w.kvm_available,
            hypervisor_available: w.hypervisor_available,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequestBody {
    pub token: String,
    pub csr_pem: String,
    pub hostname: String,
    pub host_facts: HostFactsWire,
    pub agent_version: String,
    pub os: String,
    pub arch: String,
    /// Sha256 of machine-id and primary MAC (§4.2); accepted but not
    /// cross-checked against anything on this control plane yet.
    pub host_fingerprint: Option<String>,
    pub labels: Option<serde_json::Value>,
    pub nonce: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponseBody {
    pub certificate_pem: String,
    pub ca_chain_pem: String,
    pub refresh_token: String,
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub host_id: Uuid,
    pub agent_id: Uuid,
    pub heartbeat_endpoint: String,
    pub heartbeat_interval_seconds: u32,
}

async fn enroll(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnrollRequestBody>,
) -> Result<Json<EnrollResponseBody>, AppError> {
    let now = Utc::now();
    let response = enrollment::enroll(
        &state.pool,
        &state.ca,
        state.config.client_cert_ttl_days,
        EnrollmentRequest {
            token: &body.token,
            csr_pem: &body.csr_pem,
            hostname: &body.hostname,
            host_facts: body.host_facts.into(),
            agent_version: &body.agent_version,
            os: &body.os,
            arch: &body.arch,
        },
        now,
    )
    .await?;

    Ok(Json(EnrollResponseBody {
        certificate_pem: response.certificate_pem,
        ca_chain_pem: response.ca_chain_pem,
        refresh_token: response.refresh_token,
        tenant_id: response.tenant_id,
        site_id: response.site_id,
        host_id: response.host.id,
        agent_id: response.agent.id,
        heartbeat_endpoint: "/heartbeat".to_owned(),
        heartbeat_interval_seconds: state.config.heartbeat_interval_secs,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RenewRequestBody {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub csr_pem: String,
    pub refresh_token: String,
    #[serde(default)]
    pub rotate_refresh_token: bool,
}

#[derive(Debug, Serialize)]
pub struct RenewResponseBody {
    pub certificate_pem: String,
    pub ca_chain_pem: String,
    pub serial: String,
    pub refresh_token: Option<String>,
}

async fn renew(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ClientIdentity>,
    Json(body): Json<RenewRequestBody>,
) -> Result<Json<RenewResponseBody>, AppError> {
    identity.require()?;
    let now = Utc::now();

    let response = renewal::renew(
        &state.pool,
        &state.ca,
        state.config.client_cert_ttl_days,
        body.tenant_id,
        RenewalRequest {
            agent_id: body.agent_id,
            csr_pem: &body.csr_pem,
            refresh_token: &body.refresh_token,
            rotate_refresh_token: body.rotate_refresh_token,
        },
        now,
    )
    .await?;

    Ok(Json(RenewResponseBody {
        certificate_pem: response.issued.certificate_pem,
        ca_chain_pem: response.issued.ca_chain_pem,
        serial: response.issued.serial,
        refresh_token: response.refresh_token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UnenrollRequestBody {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
}

async fn unenroll(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ClientIdentity>,
    Json(body): Json<UnenrollRequestBody>,
) -> Result<(), AppError> {
    identity.require()?;
    let now = Utc::now();
    renewal::unenroll(&state.pool, body.tenant_id, body.agent_id, now).await?;
    Ok(())
}
