//! Agent configuration (§10), assembled from CLI flags with environment
//! variable fallback — mirrors the control plane's `ServerConfig::from_env()`
//! convention, but CLI flags take precedence since an operator invokes this
//! binary interactively far more often than the server is reconfigured.

use std::path::PathBuf;

/// Resolved agent configuration for a `run` invocation.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the control plane, e.g. `https://cp.example.com:8443`.
    pub control_plane: String,
    /// Directory holding `identity.json`, `actions.db`, `vms.json`.
    pub state_dir: PathBuf,
    /// Directory holding `client.key`, `client.crt`, `ca.crt`.
    pub pki_dir: PathBuf,
    /// Directory the provider uses for MicroVM runtime state (opaque to
    /// the agent — handed to the provider black-box).
    pub runtime_dir: PathBuf,
    /// Heartbeat interval override; `None` defers to the server's
    /// `next_heartbeat_seconds` back-pressure value.
    pub heartbeat_interval_secs: Option<u32>,
    /// Run exactly one dispatcher iteration, then exit.
    pub once: bool,
}

impl AgentConfig {
    pub fn identity_path(&self) -> PathBuf {
        self.state_dir.join("identity.json")
    }

    pub fn actions_db_path(&self) -> PathBuf {
        self.state_dir.join("actions.db")
    }

    pub fn vms_path(&self) -> PathBuf {
        self.state_dir.join("vms.json")
    }

    pub fn client_key_path(&self) -> PathBuf {
        self.pki_dir.join("client.key")
    }

    pub fn client_cert_path(&self) -> PathBuf {
        self.pki_dir.join("client.crt")
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.pki_dir.join("ca.crt")
    }
}
