//! Connection pool configuration.
//!
//! Reads:
//! - `STOREFRONT_MAX_CONNECTIONS_PER_TENANT`: concurrent handles per tenant (default: 10)
//! - `STOREFRONT_CONNECTION_ACQUIRE_TIMEOUT_SECS`: wait for a free handle (default: 5)
//! - `STOREFRONT_TENANT_CACHE_CAPACITY`: resolved tenant databases kept in the LRU (default: 100)

use std::time::Duration;

/// Default maximum concurrent connections per tenant.
pub const DEFAULT_MAX_CONNECTIONS_PER_TENANT: usize = 10;

/// Default time to wait for a connection permit.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of resolved tenant databases kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Minimum cache capacity.
pub const MIN_CACHE_CAPACITY: usize = 1;

/// Maximum cache capacity.
pub const MAX_CACHE_CAPACITY: usize = 10_000;

/// Per-tenant connection limits.
#[derive(Debug, Clone)]
pub struct ConnectionPoolConfig {
    /// Maximum handles open at once for a single tenant
    pub max_connections_per_tenant: usize,
    /// How long a request waits for a handle before failing
    pub acquire_timeout: Duration,
    /// Capacity of the resolved-database LRU
    pub cache_capacity: usize,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_tenant: DEFAULT_MAX_CONNECTIONS_PER_TENANT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl ConnectionPoolConfig {
    /// Config with a specific per-tenant connection limit.
    pub fn new(max_connections_per_tenant: usize) -> Self {
        Self::default().with_max_connections(max_connections_per_tenant)
    }

    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let max_connections_per_tenant = std::env::var("STOREFRONT_MAX_CONNECTIONS_PER_TENANT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_TENANT);

        let acquire_timeout = std::env::var("STOREFRONT_CONNECTION_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT);

        let cache_capacity = std::env::var("STOREFRONT_TENANT_CACHE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_CAPACITY)
            .clamp(MIN_CACHE_CAPACITY, MAX_CACHE_CAPACITY);

        Self {
            max_connections_per_tenant,
            acquire_timeout,
            cache_capacity,
        }
    }

    /// Set the per-tenant connection limit (minimum 1).
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections_per_tenant = max.max(1);
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the resolved-database cache capacity, clamped to the allowed range.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.clamp(MIN_CACHE_CAPACITY, MAX_CACHE_CAPACITY);
        self
    }
}
