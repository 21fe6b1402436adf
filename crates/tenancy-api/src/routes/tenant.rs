//! Store routes, served on tenant domains.
//!
//! Every handler receives the request's [`TenantConnection`] from the resolver
//! and passes it explicitly to the repositories.

use super::{AppState, ClientIp};
use crate::error::{ApiError, ApiResult};
use crate::repository::carts::{self, AddToCart};
use crate::repository::products::{self, NewProduct};
use crate::repository::users::{self, NewCustomer};
use crate::resolver::{tenant_context_middleware, ResolvedTenant};
use crate::sessions::{require_admin, require_tenant_user, CurrentUser, SessionScope};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use storefront_tenancy_core::{CartItem, Product, TenancyError, TenantUser};
use storefront_tenancy_storage::TenantConnection;
use tracing::info;

/// Cache key of the home page product list.
pub const HOME_PRODUCTS_KEY: &str = "products_home_list";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserSession {
    pub token: String,
    pub user: TenantUser,
}

#[derive(Debug, Serialize)]
pub struct HomeResponse {
    pub store_name: String,
    pub products: Vec<Product>,
}

#[derive(Debug, Serialize)]
pub struct CartLine {
    pub id: i64,
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/products", get(admin_products).post(create_product))
        .route(
            "/admin/products/:id",
            put(update_product).delete(delete_product),
        )
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_tenant_user));

    let customer = Router::new()
        .route("/logout", post(logout))
        .route("/cart", get(cart).post(add_to_cart))
        .route("/cart/:id", delete(remove_from_cart))
        .route_layer(from_fn_with_state(state.clone(), require_tenant_user));

    Router::new()
        .route("/", get(home))
        .route("/register", post(register))
        .route("/login", post(login))
        .merge(customer)
        .merge(admin)
        .layer(from_fn_with_state(state.clone(), tenant_context_middleware))
        .with_state(state)
}

async fn home(
    State(state): State<AppState>,
    Extension(resolved): Extension<ResolvedTenant>,
    Extension(conn): Extension<TenantConnection>,
) -> ApiResult<Json<HomeResponse>> {
    let products = state
        .cache
        .get_or_compute(
            &resolved.context,
            HOME_PRODUCTS_KEY,
            state.config.home_cache_ttl,
            || async move { products::list_latest(&conn).await },
        )
        .await?;

    Ok(Json(HomeResponse {
        store_name: resolved.tenant.store_name,
        products,
    }))
}

async fn register(
    State(state): State<AppState>,
    Extension(resolved): Extension<ResolvedTenant>,
    Extension(conn): Extension<TenantConnection>,
    Json(req): Json<NewCustomer>,
) -> ApiResult<(StatusCode, Json<UserSession>)> {
    let user = users::create_customer(&conn, req, state.config.bcrypt_cost).await?;
    let token = state
        .sessions
        .issue(SessionScope::tenant_user(&resolved.tenant, user.id, user.role));
    info!(tenant_id = %resolved.context, user_id = user.id, "Customer registered");
    Ok((StatusCode::CREATED, Json(UserSession { token, user })))
}

async fn login(
    State(state): State<AppState>,
    Extension(resolved): Extension<ResolvedTenant>,
    Extension(conn): Extension<TenantConnection>,
    client: Option<Extension<ClientIp>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<UserSession>> {
    state.throttle_login(&req.email, client.as_ref().map(|Extension(ip)| ip))?;

    let user = users::authenticate(&conn, &req.email, &req.password).await?;
    let token = state
        .sessions
        .issue(SessionScope::tenant_user(&resolved.tenant, user.id, user.role));
    Ok(Json(UserSession { token, user }))
}

async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> StatusCode {
    state.sessions.revoke(&current.token);
    StatusCode::NO_CONTENT
}

async fn cart(
    Extension(conn): Extension<TenantConnection>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<CartItem>>> {
    Ok(Json(carts::list_for_user(&conn, current.user_id).await?))
}

async fn add_to_cart(
    Extension(conn): Extension<TenantConnection>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<AddToCart>,
) -> ApiResult<(StatusCode, Json<CartLine>)> {
    let id = carts::add_item(&conn, current.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(CartLine { id })))
}

async fn remove_from_cart(
    Extension(conn): Extension<TenantConnection>,
    Extension(current): Extension<CurrentUser>,
    Path(cart_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !carts::remove_item(&conn, current.user_id, cart_id).await? {
        return Err(ApiError(TenancyError::NotFound(format!("cart item {}", cart_id))));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_products(
    Extension(conn): Extension<TenantConnection>,
) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(products::list_latest(&conn).await?))
}

// Product mutations flush the tenant's cache before responding so the next
// read sees the write.

async fn create_product(
    State(state): State<AppState>,
    Extension(resolved): Extension<ResolvedTenant>,
    Extension(conn): Extension<TenantConnection>,
    Json(req): Json<NewProduct>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let product = products::create(&conn, req).await?;
    state.cache.invalidate(&resolved.context).await?;
    info!(tenant_id = %resolved.context, product_id = product.id, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(state): State<AppState>,
    Extension(resolved): Extension<ResolvedTenant>,
    Extension(conn): Extension<TenantConnection>,
    Path(id): Path<i64>,
    Json(req): Json<NewProduct>,
) -> ApiResult<Json<Product>> {
    let product = products::update(&conn, id, req).await?;
    state.cache.invalidate(&resolved.context).await?;
    Ok(Json(product))
}

async fn delete_product(
    State(state): State<AppState>,
    Extension(resolved): Extension<ResolvedTenant>,
    Extension(conn): Extension<TenantConnection>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    products::delete(&conn, id).await?;
    state.cache.invalidate(&resolved.context).await?;
    Ok(StatusCode::NO_CONTENT)
}
