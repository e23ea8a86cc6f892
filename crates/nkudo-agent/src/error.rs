//! Agent-side error taxonomy (§7, §6 exit code contract).
//!
//! Every fallible agent operation returns [`AgentError`]; `main` maps it to
//! one of the four documented exit codes rather than always exiting `1`.

use std::process::ExitCode;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Bad flags, missing env vars, unreadable config — exit code 1.
    #[error("configuration error: {0}")]
    Config(String),

    /// The control plane rejected enrollment outright (bad/used/expired
    /// token, CSR rejected) — exit code 3.
    #[error("enrollment rejected: {0}")]
    EnrollmentRejected(String),

    /// Local certificate is expired or the control plane reports it
    /// revoked — exit code 4.
    #[error("certificate invalid: {0}")]
    CertInvalid(String),

    /// Anything else: I/O failure, transport error, unexpected server
    /// response — exit code 2.
    #[error("{0}")]
    Runtime(String),
}

impl AgentError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::from(1),
            Self::Runtime(_) => ExitCode::from(2),
            Self::EnrollmentRejected(_) => ExitCode::from(3),
            Self::CertInvalid(_) => ExitCode::from(4),
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Runtime(format!("request failed: {err}"))
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        Self::Runtime(format!("io error: {err}"))
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Runtime(format!("json error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
