//! Tenant administration surface: tenant/site creation and enrollment-token
//! issuance, gated by the control-plane bearer token.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nkudo_core::admin;
use nkudo_storage::models::{EnrollmentToken, Site, Tenant};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tenants", post(create_tenant))
        .route("/tenants/:tenant_id/sites", post(create_site))
        .route(
            "/tenants/:tenant_id/enrollment-tokens",
            post(issue_enrollment_token),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequestBody {
    pub slug: String,
    pub name: String,
    pub primary_region: String,
    pub data_retention_days: i32,
}

async fn create_tenant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateTenantRequestBody>,
) -> Result<Json<Tenant>, AppError> {
    state.check_control_token(bearer_token(&headers))?;
    let tenant = admin::create_tenant(
        &state.pool,
        &body.slug,
        &body.name,
        &body.primary_region,
        body.data_retention_days,
    )
    .await?;
    Ok(Json(tenant))
}

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequestBody {
    pub name: String,
    pub external_key: Option<String>,
}

async fn create_site(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
    Json(body): Json<CreateSiteRequestBody>,
) -> Result<Json<Site>, AppError> {
    state.check_control_token(bearer_token(&headers))?;
    let site = admin::create_site(&state.pool, tenant_id, &body.name, body.external_key.as_deref()).await?;
    Ok(Json(site))
}

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequestBody {
    pub site_id: Uuid,
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
}

fn default_ttl_hours() -> i64 {
    24
}

#[derive(Debug, Serialize)]
pub struct IssueTokenResponseBody {
    pub token: String,
    pub record: EnrollmentToken,
}

async fn issue_enrollment_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
    Json(body): Json<IssueTokenRequestBody>,
) -> Result<Json<IssueTokenResponseBody>, AppError> {
    state.check_control_token(bearer_token(&headers))?;
    let issued =
        admin::issue_enrollment_token(&state.pool, tenant_id, body.site_id, body.ttl_hours, Utc::now())
            .await?;
    Ok(Json(IssueTokenResponseBody {
        token: issued.plaintext,
        record: issued.record,
    }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
