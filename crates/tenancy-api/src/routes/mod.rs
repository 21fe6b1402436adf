//! HTTP routing.
//!
//! Requests are dispatched by host before any path matching: central hosts
//! reach only [`central::router`], every other host reaches only
//! [`tenant::router`], which resolves the tenant first.

pub mod central;
pub mod tenant;

use crate::accounts::CentralAccounts;
use crate::config::AppConfig;
use crate::onboarding::TenantOnboarding;
use crate::registry::TenantRegistry;
use crate::resolver::extract_host;
use crate::sessions::SessionStore;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use std::sync::Arc;
use storefront_tenancy_core::Result;
use storefront_tenancy_storage::{DatabaseProvisioner, ScopedCache, TenantConnectionPool};
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[cfg(feature = "rate-limiting")]
use crate::rate_limiting::{RateLimitConfig, RateLimiter};

/// Client address recorded by the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<TenantRegistry>,
    pub accounts: Arc<CentralAccounts>,
    pub pool: Arc<TenantConnectionPool>,
    pub cache: ScopedCache,
    pub sessions: Arc<SessionStore>,
    pub onboarding: TenantOnboarding,
    #[cfg(feature = "rate-limiting")]
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Build state from configuration and initialize the registry database.
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let provisioner = DatabaseProvisioner::new(config.tenant_db_template.clone())?
            .with_timeout(config.provision_timeout);
        Self::with_provisioner(config, provisioner).await
    }

    /// Like [`initialize`](Self::initialize) with a caller-supplied provisioner.
    pub async fn with_provisioner(config: AppConfig, provisioner: DatabaseProvisioner) -> Result<Self> {
        let config = Arc::new(config);

        let registry = Arc::new(TenantRegistry::new(&config.registry_db_path));
        registry.initialize().await?;

        let accounts = Arc::new(CentralAccounts::new(
            &config.registry_db_path,
            config.bcrypt_cost,
        ));
        let pool = Arc::new(TenantConnectionPool::new(provisioner, config.pool.clone())?);
        let cache = ScopedCache::in_memory();
        let sessions = Arc::new(SessionStore::new(config.session_ttl));
        let onboarding = TenantOnboarding::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            cache.clone(),
            Arc::clone(&sessions),
            Arc::clone(&config),
        );

        info!(
            registry = %config.registry_db_path,
            tenant_template = %pool.provisioner().location_template(),
            central_domains = ?config.central_domains,
            "Application state initialized"
        );

        Ok(Self {
            config,
            registry,
            accounts,
            pool,
            cache,
            sessions,
            onboarding,
            #[cfg(feature = "rate-limiting")]
            rate_limiter: RateLimiter::new(RateLimitConfig::from_env()),
        })
    }

    /// Count a login attempt for `email` from `client`.
    ///
    /// # Errors
    ///
    /// `RateLimited` when the attempt budget for this pair is spent.
    #[cfg(feature = "rate-limiting")]
    pub fn throttle_login(&self, email: &str, client: Option<&ClientIp>) -> Result<()> {
        self.rate_limiter
            .check_login(email, client.map(|c| c.0.as_str()))
            .map_err(|retry_after_secs| {
                storefront_tenancy_core::TenancyError::RateLimited { retry_after_secs }
            })
    }

    #[cfg(not(feature = "rate-limiting"))]
    pub fn throttle_login(&self, _email: &str, _client: Option<&ClientIp>) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
struct HostRouters {
    config: Arc<AppConfig>,
    central: Router,
    tenant: Router,
}

async fn dispatch_by_host(State(routers): State<HostRouters>, req: Request) -> Response {
    let is_central = extract_host(&req)
        .map(|host| routers.config.is_central_host(&host))
        .unwrap_or(false);

    let router = if is_central {
        routers.central
    } else {
        routers.tenant
    };

    match router.oneshot(req).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Build the application router.
pub fn build_app(state: AppState) -> Router {
    let routers = HostRouters {
        config: Arc::clone(&state.config),
        central: central::router(state.clone()),
        tenant: tenant::router(state.clone()),
    };

    let cors = if state.config.cors_permissive {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    let app = Router::new()
        .fallback(dispatch_by_host)
        .with_state(routers);

    #[cfg(feature = "rate-limiting")]
    let app = app.layer(axum::middleware::from_fn_with_state(
        state.clone(),
        crate::rate_limiting::rate_limit_middleware,
    ));

    app.layer(TraceLayer::new_for_http()).layer(cors)
}
