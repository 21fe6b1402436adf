//! Storefront Tenancy Storage
//!
//! Physical isolation for tenant data: each tenant owns one SQLite file,
//! created and migrated by the [`DatabaseProvisioner`], opened per request
//! through the [`TenantConnectionPool`], and fronted by a [`ScopedCache`]
//! partitioned by tenant tag.
//!
//! # Safety
//!
//! Never hold a `rusqlite::Connection` across `.await` points. All SQLite
//! work goes through `tokio::task::spawn_blocking`, either directly or via
//! [`TenantConnection::with_connection`].

pub mod cache;
pub mod connection;
pub mod pool;
pub mod pool_config;
pub mod provisioner;
pub mod tenant;

pub use cache::{CacheStats, InMemoryTagCache, ScopedCache, TagCacheBackend};
pub use connection::TenantConnection;
pub use pool::{TenantConnectionPool, TenantPoolStats};
pub use pool_config::ConnectionPoolConfig;
pub use provisioner::{DatabaseProvisioner, TenantDatabase, TENANT_ID_PLACEHOLDER};
pub use tenant::TenantContext;
