//! Test Utilities Module
//!
//! Shared infrastructure for integration testing the Storefront API.
//! Enable via the `test-utils` feature flag.
//!
//! - `TestPlatform`: full application state on temporary databases
//! - `TestTenantBuilder`: onboard a store with an owner in one call
//! - `TestRequest`: request builder with host and bearer token
//!
//! # Usage
//!
//! ```rust,ignore
//! use storefront_tenancy_api::test_utils::TestPlatform;
//!
//! #[tokio::test]
//! async fn test_store() {
//!     let platform = TestPlatform::new().await.unwrap();
//!     let store = platform.tenant("alpha").build().await.unwrap();
//!     assert_eq!(store.domain, "alpha.localhost");
//! }
//! ```

use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

use crate::accounts::RegisterOwnerRequest;
use crate::config::AppConfig;
use crate::onboarding::RegisterTenantRequest;
use crate::routes::{build_app, AppState};
use crate::sessions::SessionScope;
use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::Router;
use storefront_tenancy_core::migrations::Migration;
use storefront_tenancy_core::{CentralOwner, Result, TenancyError};
use storefront_tenancy_storage::{DatabaseProvisioner, TenantContext};

/// Central domain used by every test platform.
pub const TEST_CENTRAL_DOMAIN: &str = "localhost";

/// Password given to owners created by the fixtures.
pub const TEST_PASSWORD: &str = "password123";

/// Host header value for a tenant subdomain.
pub fn host_for(subdomain: &str) -> String {
    format!("{}.{}", subdomain, TEST_CENTRAL_DOMAIN)
}

// ============================================================================
// Test Platform
// ============================================================================

/// Application state backed by a temporary directory.
///
/// The registry and all tenant databases are deleted when this is dropped.
pub struct TestPlatform {
    _temp_dir: TempDir,
    root: PathBuf,
    state: AppState,
}

impl TestPlatform {
    /// Platform with the standard tenant schema.
    pub async fn new() -> Result<Self> {
        Self::build(None).await
    }

    /// Platform whose tenant databases get `migrations` instead of the
    /// standard schema. Used to force provisioning or bootstrap failures.
    pub async fn with_tenant_migrations(migrations: Vec<Migration>) -> Result<Self> {
        Self::build(Some(migrations)).await
    }

    async fn build(migrations: Option<Vec<Migration>>) -> Result<Self> {
        let temp_dir =
            tempdir().map_err(|e| TenancyError::Other(format!("Failed to create temp dir: {}", e)))?;
        let root = temp_dir.path().to_path_buf();

        let config = AppConfig {
            central_domains: vec![TEST_CENTRAL_DOMAIN.to_string()],
            registry_db_path: root.join("central.db").to_string_lossy().to_string(),
            tenant_db_template: root
                .join("tenants/tenant{tenant_id}.db")
                .to_string_lossy()
                .to_string(),
            bcrypt_cost: 4,
            ..AppConfig::default()
        };
        config.validate()?;

        let mut provisioner = DatabaseProvisioner::new(config.tenant_db_template.clone())?
            .with_timeout(config.provision_timeout);
        if let Some(migrations) = migrations {
            provisioner = provisioner.with_migrations(migrations);
        }

        let state = AppState::with_provisioner(config, provisioner).await?;
        Ok(Self {
            _temp_dir: temp_dir,
            root,
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// A fresh router over this platform's state.
    pub fn app(&self) -> Router {
        build_app(self.state.clone())
    }

    /// Directory holding every database of this platform.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Where the tenant database for `tenant_id` lives (whether or not it exists).
    pub fn tenant_db_path(&self, tenant_id: &str) -> Result<PathBuf> {
        let ctx = TenantContext::new(tenant_id)?;
        Ok(self.state.pool.provisioner().database_path(&ctx))
    }

    /// Register a central owner.
    pub async fn owner(&self, name: &str, email: &str) -> Result<CentralOwner> {
        self.state
            .accounts
            .register_owner(RegisterOwnerRequest {
                name: name.to_string(),
                email: email.to_string(),
                password: TEST_PASSWORD.to_string(),
                password_confirmation: TEST_PASSWORD.to_string(),
            })
            .await
    }

    /// Central session token for an owner.
    pub fn owner_token(&self, owner: &CentralOwner) -> String {
        self.state
            .sessions
            .issue(SessionScope::Central { owner_id: owner.id })
    }

    /// Start building a store.
    pub fn tenant(&self, subdomain: &str) -> TestTenantBuilder<'_> {
        TestTenantBuilder::new(self, subdomain)
    }
}

// ============================================================================
// Test Tenant Builder
// ============================================================================

/// A store created by [`TestTenantBuilder`].
#[derive(Debug, Clone)]
pub struct TestTenant {
    pub tenant_id: String,
    pub domain: String,
    pub owner: CentralOwner,
    /// Tenant session for the store's admin account
    pub admin_token: String,
}

/// Builder for onboarding test stores.
pub struct TestTenantBuilder<'a> {
    platform: &'a TestPlatform,
    subdomain: String,
    store_name: Option<String>,
    owner: Option<CentralOwner>,
}

impl<'a> TestTenantBuilder<'a> {
    pub fn new(platform: &'a TestPlatform, subdomain: &str) -> Self {
        Self {
            platform,
            subdomain: subdomain.to_string(),
            store_name: None,
            owner: None,
        }
    }

    pub fn store_name(mut self, name: &str) -> Self {
        self.store_name = Some(name.to_string());
        self
    }

    /// Use an existing owner instead of creating `owner@{subdomain}.test`.
    pub fn owner(mut self, owner: CentralOwner) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Run the onboarding saga and log the owner in as store admin.
    pub async fn build(self) -> Result<TestTenant> {
        let owner = match self.owner {
            Some(owner) => owner,
            None => {
                self.platform
                    .owner("Owner", &format!("owner@{}.test", self.subdomain))
                    .await?
            }
        };

        let store_name = self
            .store_name
            .unwrap_or_else(|| format!("{} store", self.subdomain));
        let onboarded = self
            .platform
            .state
            .onboarding
            .register(
                &owner,
                RegisterTenantRequest {
                    store_name,
                    subdomain: self.subdomain,
                },
            )
            .await?;

        let ctx = TenantContext::new(&onboarded.tenant.id)?;
        let conn = self.platform.state.pool.acquire(&ctx).await?;
        let admin = crate::repository::users::find_by_email(&conn, &owner.email).await;
        conn.release();
        let admin = admin?.ok_or_else(|| {
            TenancyError::NotFound(format!("admin for tenant '{}'", onboarded.tenant.id))
        })?;

        let admin_token = self.platform.state.sessions.issue(SessionScope::tenant_user(
            &onboarded.tenant,
            admin.id,
            admin.role,
        ));

        Ok(TestTenant {
            tenant_id: onboarded.tenant.id,
            domain: onboarded.domain.domain,
            owner,
            admin_token,
        })
    }
}

// ============================================================================
// Request Builder
// ============================================================================

/// Request builder carrying host and optional bearer token.
pub struct TestRequest {
    method: Method,
    uri: String,
    host: String,
    token: Option<String>,
    body: Option<serde_json::Value>,
}

impl TestRequest {
    pub fn new(method: Method, host: &str, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            host: host.to_string(),
            token: None,
            body: None,
        }
    }

    pub fn get(host: &str, uri: &str) -> Self {
        Self::new(Method::GET, host, uri)
    }

    pub fn post(host: &str, uri: &str) -> Self {
        Self::new(Method::POST, host, uri)
    }

    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn build(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method(self.method)
            .uri(self.uri)
            .header(header::HOST, self.host);

        if let Some(token) = self.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let body = match self.body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        builder.body(body).unwrap_or_default()
    }
}
