//! HTTP route modules for the n-kudo control plane (§6).
//!
//! Routes fall into three auth surfaces: bootstrap (`/enroll`, `/healthz` —
//! no client certificate required), mTLS (everything an enrolled agent
//! calls), and admin/operator (tenant and site management, plan submission
//! and listing — a static bearer token via [`crate::state::AppState::check_control_token`]).

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

mod admin;
mod executions;
mod healthz;
pub(crate) mod heartbeat;
mod identity;
mod logs;
mod plans;

/// Build the full application router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(healthz::router())
        .merge(identity::router())
        .merge(heartbeat::router())
        .merge(plans::router())
        .merge(executions::router())
        .merge(logs::router())
        .merge(admin::router())
}
