//! Server configuration.
//!
//! Reads:
//! - `STOREFRONT_CENTRAL_DOMAINS`: comma-separated central hostnames (default: `localhost`)
//! - `STOREFRONT_REGISTRY_DB`: registry database path (default: `storefront_central.db`)
//! - `STOREFRONT_TENANT_DB_TEMPLATE`: tenant database path, must contain `{tenant_id}`
//!   (default: `tenants/tenant{tenant_id}.db`)
//! - `STOREFRONT_PORT`: listen port (default: 8000)
//! - `STOREFRONT_PUBLIC_SCHEME`, `STOREFRONT_PUBLIC_PORT`: used to build tenant URLs
//! - `STOREFRONT_PROVISION_TIMEOUT_SECS` (default: 30)
//! - `STOREFRONT_HOME_CACHE_TTL_SECS` (default: 3600)
//! - `STOREFRONT_SESSION_TTL_SECS` (default: 7200)
//! - `STOREFRONT_BCRYPT_COST` (default: 12)
//! - `STOREFRONT_CORS_PERMISSIVE`: "true" to allow any origin (default: false)
//!
//! Connection pool settings are read separately by [`ConnectionPoolConfig::from_env`].

use std::time::Duration;
use storefront_tenancy_core::validation::normalize_hostname;
use storefront_tenancy_core::{Result, TenancyError};
use storefront_tenancy_storage::{ConnectionPoolConfig, TENANT_ID_PLACEHOLDER};

const DEFAULT_CENTRAL_DOMAIN: &str = "localhost";
const DEFAULT_REGISTRY_DB: &str = "storefront_central.db";
const DEFAULT_TENANT_DB_TEMPLATE: &str = "tenants/tenant{tenant_id}.db";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_PROVISION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HOME_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_SESSION_TTL_SECS: u64 = 7200;
const DEFAULT_BCRYPT_COST: u32 = 12;

/// bcrypt accepts costs in this range.
const BCRYPT_COST_RANGE: std::ops::RangeInclusive<u32> = 4..=31;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Hostnames that serve the central (platform) routes, first one is primary
    pub central_domains: Vec<String>,
    pub registry_db_path: String,
    pub tenant_db_template: String,
    pub port: u16,
    pub public_scheme: String,
    /// Port appended to tenant URLs; `None` omits it
    pub public_port: Option<u16>,
    pub provision_timeout: Duration,
    pub home_cache_ttl: Duration,
    pub session_ttl: Duration,
    pub bcrypt_cost: u32,
    pub cors_permissive: bool,
    pub pool: ConnectionPoolConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            central_domains: vec![DEFAULT_CENTRAL_DOMAIN.to_string()],
            registry_db_path: DEFAULT_REGISTRY_DB.to_string(),
            tenant_db_template: DEFAULT_TENANT_DB_TEMPLATE.to_string(),
            port: DEFAULT_PORT,
            public_scheme: "http".to_string(),
            public_port: None,
            provision_timeout: Duration::from_secs(DEFAULT_PROVISION_TIMEOUT_SECS),
            home_cache_ttl: Duration::from_secs(DEFAULT_HOME_CACHE_TTL_SECS),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            cors_permissive: false,
            pool: ConnectionPoolConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl AppConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let central_domains = std::env::var("STOREFRONT_CENTRAL_DOMAINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|d| d.trim().to_ascii_lowercase())
                    .filter(|d| !d.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|domains| !domains.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_CENTRAL_DOMAIN.to_string()]);

        let registry_db_path = std::env::var("STOREFRONT_REGISTRY_DB")
            .unwrap_or_else(|_| DEFAULT_REGISTRY_DB.to_string());

        let tenant_db_template = std::env::var("STOREFRONT_TENANT_DB_TEMPLATE")
            .unwrap_or_else(|_| DEFAULT_TENANT_DB_TEMPLATE.to_string());

        let public_scheme = std::env::var("STOREFRONT_PUBLIC_SCHEME")
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_else(|_| "http".to_string());

        let cors_permissive = std::env::var("STOREFRONT_CORS_PERMISSIVE")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            central_domains,
            registry_db_path,
            tenant_db_template,
            port: env_parse("STOREFRONT_PORT").unwrap_or(DEFAULT_PORT),
            public_scheme,
            public_port: env_parse("STOREFRONT_PUBLIC_PORT"),
            provision_timeout: Duration::from_secs(
                env_parse("STOREFRONT_PROVISION_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_PROVISION_TIMEOUT_SECS),
            ),
            home_cache_ttl: Duration::from_secs(
                env_parse("STOREFRONT_HOME_CACHE_TTL_SECS").unwrap_or(DEFAULT_HOME_CACHE_TTL_SECS),
            ),
            session_ttl: Duration::from_secs(
                env_parse("STOREFRONT_SESSION_TTL_SECS").unwrap_or(DEFAULT_SESSION_TTL_SECS),
            ),
            bcrypt_cost: env_parse("STOREFRONT_BCRYPT_COST").unwrap_or(DEFAULT_BCRYPT_COST),
            cors_permissive,
            pool: ConnectionPoolConfig::from_env(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.central_domains.is_empty() {
            return Err(TenancyError::invalid(
                "STOREFRONT_CENTRAL_DOMAINS",
                "at least one central domain is required",
            ));
        }
        for domain in &self.central_domains {
            normalize_hostname(domain).map_err(|_| {
                TenancyError::invalid(
                    "STOREFRONT_CENTRAL_DOMAINS",
                    format!("'{}' is not a valid hostname", domain),
                )
            })?;
        }

        if !self.tenant_db_template.contains(TENANT_ID_PLACEHOLDER) {
            return Err(TenancyError::invalid(
                "STOREFRONT_TENANT_DB_TEMPLATE",
                "must contain {tenant_id}",
            ));
        }

        if !matches!(self.public_scheme.as_str(), "http" | "https") {
            return Err(TenancyError::invalid(
                "STOREFRONT_PUBLIC_SCHEME",
                "must be http or https",
            ));
        }

        if !BCRYPT_COST_RANGE.contains(&self.bcrypt_cost) {
            return Err(TenancyError::invalid(
                "STOREFRONT_BCRYPT_COST",
                format!(
                    "must be between {} and {}",
                    BCRYPT_COST_RANGE.start(),
                    BCRYPT_COST_RANGE.end()
                ),
            ));
        }

        if self.session_ttl.is_zero() {
            return Err(TenancyError::invalid(
                "STOREFRONT_SESSION_TTL_SECS",
                "must be positive",
            ));
        }

        if self.provision_timeout.is_zero() {
            return Err(TenancyError::invalid(
                "STOREFRONT_PROVISION_TIMEOUT_SECS",
                "must be positive",
            ));
        }

        Ok(())
    }

    /// Domain new tenant subdomains are created under.
    pub fn primary_central_domain(&self) -> &str {
        self.central_domains
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_CENTRAL_DOMAIN)
    }

    /// Check whether a (normalized) host is a central domain.
    pub fn is_central_host(&self, host: &str) -> bool {
        self.central_domains.iter().any(|d| d == host)
    }

    /// Hostname assigned to a new tenant.
    pub fn tenant_domain(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.primary_central_domain())
    }

    /// Public URL of a tenant domain.
    pub fn tenant_url(&self, domain: &str) -> String {
        match self.public_port {
            Some(port) => format!("{}://{}:{}", self.public_scheme, domain, port),
            None => format!("{}://{}", self.public_scheme, domain),
        }
    }
}
