//! HTTP client for the control plane's API (§6).
//!
//! A standalone `reqwest` wrapper with no dependency on any other crate in
//! this workspace — the agent talks to the control plane exclusively over
//! its HTTP API, never through a shared Rust type, the same way the
//! reference CLI talks to its server over REST alone.

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{AgentError, Result};
use crate::wire::{
    EnrollRequestBody, EnrollResponseBody, ErrorBody, HeartbeatRequestBody, HeartbeatResponseBody,
    IngestLogsRequestBody, PendingPlanWire, RenewRequestBody, RenewResponseBody,
    ReportResultsRequestBody, UnenrollRequestBody,
};

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// Build a client trusting only `ca_cert_pem`, with no client
    /// certificate presented — used for the bootstrap `/enroll` call and
    /// for `/healthz`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Runtime`] if `ca_cert_pem` does not parse or
    /// the underlying TLS backend cannot be built.
    pub fn bootstrap(base_url: &str, ca_cert_pem: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        builder = match ca_cert_pem {
            Some(pem) => {
                let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                    .map_err(|e| AgentError::Runtime(format!("invalid CA certificate: {e}")))?;
                builder.add_root_certificate(cert).tls_built_in_root_certs(false)
            }
            None => {
                tracing::warn!(
                    "no --ca-cert supplied for bootstrap enrollment: trusting the control \
                     plane's presented certificate on first contact (TOFU). Pass --ca-cert \
                     to pin it instead."
                );
                builder.danger_accept_invalid_certs(true)
            }
        };

        let http = builder
            .build()
            .map_err(|e| AgentError::Runtime(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Build a client presenting `client_cert_pem`/`client_key_pem` and
    /// trusting `ca_cert_pem` — used for every authenticated call after
    /// enrollment.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Runtime`] if the PEM material does not parse
    /// or the identity cannot be built.
    pub fn with_identity(
        base_url: &str,
        ca_cert_pem: &str,
        client_cert_pem: &str,
        client_key_pem: &str,
    ) -> Result<Self> {
        let ca_cert = reqwest::Certificate::from_pem(ca_cert_pem.as_bytes())
            .map_err(|e| AgentError::Runtime(format!("invalid CA certificate: {e}")))?;

        let mut identity_pem = client_cert_pem.as_bytes().to_vec();
        identity_pem.extend_from_slice(b"\n");
        identity_pem.extend_from_slice(client_key_pem.as_bytes());
        let identity = reqwest::Identity::from_pem(&identity_pem)
            .map_err(|e| AgentError::Runtime(format!("invalid client identity: {e}")))?;

        let http = reqwest::Client::builder()
            .add_root_certificate(ca_cert)
            .tls_built_in_root_certs(false)
            .identity(identity)
            .build()
            .map_err(|e| AgentError::Runtime(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Runtime(format!("request to {path} failed: {e}")))?;
        handle_response(resp).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| AgentError::Runtime(format!("request to {path} failed: {e}")))?;
        handle_response(resp).await
    }

    /// Like [`Client::post`] but for endpoints that respond with no body
    /// (or a body we don't care about) on success.
    async fn post_empty<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Runtime(format!("request to {path} failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let raw = resp.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&raw).ok();
        let message = parsed.map_or(raw, |e| format!("{}: {}", e.error, e.message));
        Err(classify_error(status, &message))
    }

    pub async fn enroll(&self, body: &EnrollRequestBody) -> Result<EnrollResponseBody> {
        self.post("/enroll", body).await
    }

    pub async fn renew(&self, body: &RenewRequestBody) -> Result<RenewResponseBody> {
        self.post("/renew", body).await
    }

    pub async fn unenroll(&self, body: &UnenrollRequestBody) -> Result<()> {
        self.post_empty("/unenroll", body).await
    }

    pub async fn heartbeat(&self, body: &HeartbeatRequestBody) -> Result<HeartbeatResponseBody> {
        self.post("/heartbeat", body).await
    }

    pub async fn next_plans(
        &self,
        tenant_id: uuid::Uuid,
        site_id: uuid::Uuid,
        agent_id: uuid::Uuid,
    ) -> Result<Vec<PendingPlanWire>> {
        self.get(&format!(
            "/plans/next?tenant_id={tenant_id}&site_id={site_id}&agent_id={agent_id}"
        ))
        .await
    }

    pub async fn report_results(&self, body: &ReportResultsRequestBody) -> Result<()> {
        self.post_empty("/executions/result", body).await
    }

    /// Best-effort log shipping (§7): failures are the caller's problem to
    /// log and drop, never to propagate into the dispatcher loop.
    pub async fn send_logs(&self, body: &IngestLogsRequestBody) -> Result<()> {
        self.post_empty("/logs", body).await
    }

    pub async fn healthz(&self) -> Result<()> {
        let resp = self
            .http
            .get(self.url("/healthz"))
            .send()
            .await
            .map_err(|e| AgentError::Runtime(format!("healthz request failed: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::Runtime(format!(
                "control plane healthz returned {}",
                resp.status()
            )))
        }
    }
}

async fn handle_response<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R> {
    let status = resp.status();
    if status == StatusCode::NO_CONTENT {
        return serde_json::from_value(serde_json::Value::Null)
            .map_err(|e| AgentError::Runtime(format!("failed to decode empty response: {e}")));
    }

    let body = resp
        .text()
        .await
        .map_err(|e| AgentError::Runtime(format!("failed to read response body: {e}")))?;

    if !status.is_success() {
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let message = parsed.map_or_else(|| body.clone(), |e| format!("{}: {}", e.error, e.message));
        return Err(classify_error(status, &message));
    }

    serde_json::from_str(&body)
        .map_err(|e| AgentError::Runtime(format!("failed to parse response JSON: {e}")))
}

fn classify_error(status: StatusCode, message: &str) -> AgentError {
    match status {
        StatusCode::UNAUTHORIZED if message.contains("TOKEN_") => {
            AgentError::EnrollmentRejected(message.to_owned())
        }
        StatusCode::UNAUTHORIZED if message.contains("CERT_REVOKED") => {
            AgentError::CertInvalid(message.to_owned())
        }
        _ => AgentError::Runtime(format!("server returned {status}: {message}")),
    }
}
