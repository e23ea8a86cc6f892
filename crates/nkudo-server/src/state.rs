//! Shared application state for the n-kudo control plane.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the database pool, the in-memory CA
//! material, and the handful of tunables the service layer needs.

use std::sync::Arc;

use nkudo_core::pki::CaMaterial;
use sqlx::PgPool;

use crate::config::ServerConfig;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    pub pool: PgPool,
    pub ca: Arc<CaMaterial>,
    pub config: ServerConfig,
    /// Stable identifier for this process instance, used as the holder id
    /// in leader-lease acquisition (sweeper).
    pub instance_id: String,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Authorize a caller against the static control-plane token used by the
    /// admin/operator surface (`/tenants/*`, `/sites/*/plans`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AppError::Unauthorized`] if the header is
    /// missing or does not match.
    pub fn check_control_token(&self, presented: Option<&str>) -> Result<(), crate::error::AppError> {
        match presented {
            Some(token) if subtle_eq(token, &self.config.control_token) => Ok(()),
            _ => Err(crate::error::AppError::Unauthorized(
                "missing or invalid control-plane token".to_owned(),
            )),
        }
    }
}

/// Constant-time string comparison, avoiding timing side-channels on the
/// admin/operator bearer token.
fn subtle_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}
