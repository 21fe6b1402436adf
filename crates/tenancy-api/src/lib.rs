//! Storefront Tenancy API Library
//!
//! Library components for the Storefront API server: the tenant registry,
//! onboarding saga, host-based tenant resolution, sessions, tenant data
//! repositories and the HTTP routes that tie them together.

pub mod accounts;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod passwords;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod routes;
pub mod sessions;

#[cfg(feature = "rate-limiting")]
pub mod rate_limiting;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use routes::{build_app, AppState};
