//! Wire types shared with the control plane (§6).
//!
//! The agent has no dependency on `nkudo-storage` or `nkudo-core` — it
//! talks to the control plane exclusively over its HTTP API, the same way
//! the reference CLI talks to its server over REST with no shared crate.
//! These mirror types must serialize identically to the control plane's
//! own enum representation to interoperate: e.g. `OperationType::Create`
//! round-trips as the JSON string `"CREATE"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Create,
    Start,
    Stop,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MicroVmState {
    Creating,
    Stopped,
    Running,
    Deleting,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectivityState {
    Online,
    Partial,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostFactsWire {
    pub cpu_cores_total: i32,
    pub memory_bytes_total: i64,
    pub storage_bytes_total: i64,
    pub kvm_available: bool,
    pub hypervisor_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroVmWire {
    pub name: String,
    pub state: MicroVmState,
    pub vcpu_count: i32,
    pub memory_mib: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollRequestBody {
    pub token: String,
    pub csr_pem: String,
    pub hostname: String,
    pub host_facts: HostFactsWire,
    pub agent_version: String,
    pub os: String,
    pub arch: String,
    pub host_fingerprint: Option<String>,
    pub labels: Option<serde_json::Value>,
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
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

#[derive(Debug, Clone, Serialize)]
pub struct RenewRequestBody {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub csr_pem: String,
    pub refresh_token: String,
    pub rotate_refresh_token: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenewResponseBody {
    pub certificate_pem: String,
    pub ca_chain_pem: String,
    pub serial: String,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnenrollRequestBody {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequestBody {
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub host_id: Uuid,
    pub agent_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub host_facts: HostFactsWire,
    pub mesh_status: Option<serde_json::Value>,
    pub vms: Vec<MicroVmWire>,
    pub shutdown: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanActionWire {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub operation_id: String,
    pub operation_type: OperationType,
    pub vm_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub sort_order: i64,
    /// The id of this action's `Execution` row, joined in by the server
    /// (§4.6) — the agent has no other way to learn it, and needs it to
    /// stream `LogEntry`s against the right execution.
    pub execution_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingPlanWire {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub idempotency_key: String,
    pub client_request_id: Option<String>,
    pub plan_version: i64,
    pub status: PlanStatus,
    pub leased_by_agent_id: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub actions: Vec<PlanActionWire>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatResponseBody {
    pub next_heartbeat_seconds: u32,
    pub pending_plans: Vec<PendingPlanWire>,
    pub site_connectivity: ConnectivityState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResultWire {
    pub operation_id: String,
    pub ok: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub host_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportResultsRequestBody {
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub agent_id: Uuid,
    pub results: Vec<ActionResultWire>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntryWire {
    pub execution_id: Uuid,
    pub sequence: i64,
    pub severity: LogSeverity,
    pub message: String,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestLogsRequestBody {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub entries: Vec<LogEntryWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
