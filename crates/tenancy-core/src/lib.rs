//! Storefront Tenancy Core
//!
//! Core types, error taxonomy, validation, and SQLite schema migrations shared
//! by the registry database and every per-tenant store database.

use serde::{Deserialize, Serialize};

pub mod migrations;
pub mod validation;

// ============================================================================
// Registry Types
// ============================================================================

/// A registered tenant (one store) from the registry database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Alphanumeric slug, also the suffix of the tenant database name
    pub id: String,
    /// Display name of the store
    pub store_name: String,
    /// RFC 3339 creation timestamp (microsecond precision, UTC)
    pub created_at: String,
}

/// A hostname bound to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub domain: String,
    pub tenant_id: String,
}

/// A tenant together with every hostname mapped to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantWithDomains {
    #[serde(flatten)]
    pub tenant: Tenant,
    pub domains: Vec<String>,
}

/// A platform-level store owner, stored in the registry database.
///
/// The password hash is an opaque bcrypt string. It is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralOwner {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: String,
}

// ============================================================================
// Tenant-Scoped Types
// ============================================================================

/// Role of a user inside one tenant database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Store administrator, created by the bootstrap step
    Admin,
    /// Shopper who registered on the store domain
    #[default]
    Customer,
}

impl UserRole {
    /// Get role as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Customer => "customer",
        }
    }

    /// Check if the role may create, edit, or delete products.
    pub fn can_manage_products(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl std::str::FromStr for UserRole {
    type Err = TenancyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "customer" => Ok(UserRole::Customer),
            _ => Err(TenancyError::Other(format!("Unknown user role: {}", s))),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user row from a tenant database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: String,
}

/// A product row from a tenant database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Price in minor currency units
    pub price_cents: i64,
    pub stock: i64,
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One cart line joined with its product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub price_cents: i64,
    pub quantity: i64,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced by the tenancy subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TenancyError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Tenant id already registered
    #[error("Tenant id already taken: {0}")]
    DuplicateId(String),

    /// Tenant id is not an alphanumeric slug
    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(String),

    /// Database creation, migration, or bootstrap failed; creation was rolled back
    #[error("Provisioning failed: {0}")]
    ProvisionFailed(String),

    /// Hostname is already bound to a tenant
    #[error("Domain already in use: {0}")]
    DomainConflict(String),

    /// Host matches no tenant and is not a central domain
    #[error("No tenant for host: {0}")]
    ResolutionFailed(String),

    /// Admin account could not be seeded into the new tenant database
    #[error("Bootstrap failed: {0}")]
    BootstrapFailed(String),

    /// Cache backend failure; callers fall back to the source of truth
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed")]
    AuthenticationFailed { field: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error on '{field}': {message}")]
    ValidationError { field: String, message: String },

    /// Tenant connection pool saturated or otherwise temporarily unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Too many attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TenancyError {
    /// Shorthand for a field-level validation error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        TenancyError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable snake_case code for API responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TenancyError::Sqlite(_) => "storage_error",
            TenancyError::DuplicateId(_) => "duplicate_id",
            TenancyError::InvalidTenantId(_) => "invalid_tenant_id",
            TenancyError::ProvisionFailed(_) => "provision_failed",
            TenancyError::DomainConflict(_) => "domain_conflict",
            TenancyError::ResolutionFailed(_) => "resolution_failed",
            TenancyError::BootstrapFailed(_) => "bootstrap_failed",
            TenancyError::CacheUnavailable(_) => "cache_unavailable",
            TenancyError::NotFound(_) => "not_found",
            TenancyError::AuthenticationFailed { .. } => "authentication_failed",
            TenancyError::Forbidden(_) => "forbidden",
            TenancyError::ValidationError { .. } => "validation_error",
            TenancyError::Unavailable(_) => "unavailable",
            TenancyError::RateLimited { .. } => "rate_limited",
            TenancyError::SerializationError(_) => "serialization_error",
            TenancyError::Other(_) => "internal_error",
        }
    }

    /// Validation-class errors are recovered at the boundary as field errors.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TenancyError::DuplicateId(_)
                | TenancyError::InvalidTenantId(_)
                | TenancyError::DomainConflict(_)
                | TenancyError::ValidationError { .. }
        )
    }

    /// Form field the error should be reported against, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            TenancyError::DuplicateId(_) | TenancyError::InvalidTenantId(_) => Some("subdomain"),
            TenancyError::DomainConflict(_) => Some("domain"),
            TenancyError::ValidationError { field, .. } => Some(field),
            TenancyError::AuthenticationFailed { field } => Some(field),
            _ => None,
        }
    }
}

/// Result type for tenancy operations.
pub type Result<T> = std::result::Result<T, TenancyError>;

/// Check whether a SQLite error is a UNIQUE or PRIMARY KEY constraint violation.
///
/// Uniqueness constraints are the only mechanism used to detect duplicate
/// tenant ids, domains, and emails; there is no separate exists-check.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// Current UTC time formatted for storage.
///
/// Microsecond precision keeps `ORDER BY created_at` stable for rows
/// created within the same second.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
