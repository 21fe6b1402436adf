//! Central (platform) routes: owner accounts and store creation.

use super::{AppState, ClientIp};
use crate::accounts::RegisterOwnerRequest;
use crate::error::ApiResult;
use crate::onboarding::{OnboardedTenant, RegisterTenantRequest};
use crate::sessions::{require_owner, CurrentOwner, SessionScope};
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use storefront_tenancy_core::{CentralOwner, TenantWithDomains};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct OwnerSession {
    pub token: String,
    pub owner: CentralOwner,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub owner: CentralOwner,
    pub tenants: Vec<TenantWithDomains>,
}

pub fn router(state: AppState) -> Router {
    let owner_only = Router::new()
        .route("/logout", post(logout))
        .route("/dashboard", get(dashboard))
        .route("/tenants", post(create_tenant))
        .route_layer(from_fn_with_state(state.clone(), require_owner));

    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/login", post(login))
        .merge(owner_only)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterOwnerRequest>,
) -> ApiResult<(StatusCode, Json<OwnerSession>)> {
    let owner = state.accounts.register_owner(req).await?;
    let token = state.sessions.issue(SessionScope::Central { owner_id: owner.id });
    Ok((StatusCode::CREATED, Json(OwnerSession { token, owner })))
}

async fn login(
    State(state): State<AppState>,
    client: Option<Extension<ClientIp>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<OwnerSession>> {
    state.throttle_login(&req.email, client.as_ref().map(|Extension(ip)| ip))?;

    let owner = state.accounts.authenticate(&req.email, &req.password).await?;
    let token = state.sessions.issue(SessionScope::Central { owner_id: owner.id });
    info!(owner_id = owner.id, "Owner logged in");
    Ok(Json(OwnerSession { token, owner }))
}

async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentOwner>,
) -> StatusCode {
    state.sessions.revoke(&current.token);
    StatusCode::NO_CONTENT
}

async fn dashboard(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentOwner>,
) -> ApiResult<Json<DashboardResponse>> {
    let tenants = state.registry.list_tenants().await?;
    Ok(Json(DashboardResponse {
        owner: current.owner,
        tenants,
    }))
}

async fn create_tenant(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentOwner>,
    Json(req): Json<RegisterTenantRequest>,
) -> ApiResult<(StatusCode, Json<OnboardedTenant>)> {
    let onboarded = state.onboarding.register(&current.owner, req).await?;
    Ok((StatusCode::CREATED, Json(onboarded)))
}
