//! Domain error types for `nkudo-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. These are mapped onto the stable error-code taxonomy by
//! `nkudo-server`; this crate has no notion of HTTP status codes.

use nkudo_storage::StoreError;

/// Errors from the CA / PKI engine.
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    /// No root CA has been generated yet.
    #[error("no root CA configured")]
    NoRootCa,

    /// A submitted CSR failed signature, CN, or key-algorithm validation.
    #[error("invalid CSR: {reason}")]
    InvalidCsr { reason: String },

    /// Certificate generation or signing failed.
    #[error("certificate generation failed: {reason}")]
    CertGeneration { reason: String },

    /// The serial presented by the caller is on the CRL.
    #[error("certificate revoked: {serial}")]
    CertRevoked { serial: String },

    /// No certificate history exists for the given agent.
    #[error("no certificate on record for agent {agent_id}")]
    NoCertificateOnRecord { agent_id: String },

    /// The storage layer returned an error.
    #[error("pki storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from the enrollment pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    /// The presented token does not match any known hash.
    #[error("enrollment token invalid")]
    TokenInvalid,

    /// The presented token has already been consumed.
    #[error("enrollment token already used")]
    TokenUsed,

    /// The presented token's validity window has passed.
    #[error("enrollment token expired")]
    TokenExpired,

    /// CSR or request-shape validation failed.
    #[error("invalid enrollment request: {reason}")]
    InvalidRequest { reason: String },

    /// A PKI operation within enrollment failed.
    #[error("pki error during enrollment: {0}")]
    Pki(#[from] PkiError),

    /// The storage layer returned an error.
    #[error("enrollment storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from certificate renewal / unenrollment.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The refresh token presented does not match the stored hash.
    #[error("refresh token invalid")]
    RefreshTokenInvalid,

    /// The caller's certificate serial is revoked.
    #[error("certificate revoked")]
    CertRevoked,

    /// The caller's presented certificate serial does not match the
    /// agent's current `cert_serial` on record.
    #[error("certificate serial mismatch")]
    CertMismatch,

    /// No such agent is on record.
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// A PKI operation failed.
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// The storage layer returned an error.
    #[error("identity storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from the heartbeat service.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// `sent_at` is more than the allowed skew in the future.
    #[error("heartbeat sent_at is stale or out of window")]
    Stale,

    /// The caller's certificate serial does not match `agents.cert_serial`.
    #[error("heartbeat certificate serial mismatch")]
    CertMismatch,

    /// No such agent is on record.
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// The storage layer returned an error.
    #[error("heartbeat storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from plan submission, leasing, and reporting.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// No such plan is on record.
    #[error("plan not found: {plan_id}")]
    NotFound { plan_id: String },

    /// The request shape was invalid (e.g. empty action list).
    #[error("invalid plan request: {reason}")]
    InvalidRequest { reason: String },

    /// The storage layer returned an error.
    #[error("plan storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from the offline sweeper.
#[derive(Debug, thiserror::Error)]
pub enum SweeperError {
    /// The storage layer returned an error.
    #[error("sweeper storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from the audit hash chain.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A recomputed hash did not match the stored `entry_hash`.
    #[error("audit chain mismatch at sequence {sequence}")]
    ChainMismatch { sequence: i64 },

    /// The storage layer returned an error.
    #[error("audit storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from tenant administration (create tenant, issue tokens, etc).
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// The request shape was invalid.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The storage layer returned an error.
    #[error("admin storage error: {0}")]
    Storage(#[from] StoreError),
}
