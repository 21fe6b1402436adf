//! Per-tenant connection pool.
//!
//! # Architecture
//!
//! ```text
//! TenantConnectionPool
//!        │
//!        ├── DatabaseProvisioner (location template)
//!        │
//!        ├── LRU of located databases (capacity: N)
//!        │     ├── "alpha" → TenantDatabase
//!        │     └── "beta"  → TenantDatabase
//!        │
//!        └── per-tenant semaphores (max connections per tenant)
//! ```
//!
//! `acquire` waits for a permit, locates the tenant database (cached), opens a
//! fresh connection, and wraps both in a [`TenantConnection`]. Handles are
//! never shared across requests; only the database location is cached.
//!
//! The pool is thread-safe and meant to be shared as `Arc<TenantConnectionPool>`.

use crate::pool_config::ConnectionPoolConfig;
use crate::{DatabaseProvisioner, TenantConnection, TenantContext, TenantDatabase};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use storefront_tenancy_core::{Result, TenancyError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Snapshot of pool state.
#[derive(Debug, Clone)]
pub struct TenantPoolStats {
    pub capacity: usize,
    pub cached_databases: usize,
    pub cached_tenants: Vec<String>,
    pub tracked_tenants: usize,
}

/// Pool of tenant connections with per-tenant limits.
pub struct TenantConnectionPool {
    provisioner: DatabaseProvisioner,
    databases: Mutex<LruCache<String, Arc<TenantDatabase>>>,
    semaphores: DashMap<String, Arc<Semaphore>>,
    config: ConnectionPoolConfig,
}

impl std::fmt::Debug for TenantConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnectionPool")
            .field("template", &self.provisioner.location_template())
            .field("cached_databases", &self.databases.lock().len())
            .field("tracked_tenants", &self.semaphores.len())
            .field("config", &self.config)
            .finish()
    }
}

impl TenantConnectionPool {
    /// Create a pool over databases laid out by `provisioner`.
    pub fn new(provisioner: DatabaseProvisioner, config: ConnectionPoolConfig) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| TenancyError::invalid("cache_capacity", "must be at least 1"))?;

        info!(
            template = %provisioner.location_template(),
            cache_capacity = config.cache_capacity,
            max_connections = config.max_connections_per_tenant,
            "Created TenantConnectionPool"
        );

        Ok(Self {
            provisioner,
            databases: Mutex::new(LruCache::new(capacity)),
            semaphores: DashMap::new(),
            config,
        })
    }

    /// The provisioner whose layout this pool reads.
    pub fn provisioner(&self) -> &DatabaseProvisioner {
        &self.provisioner
    }

    /// Pool configuration.
    pub fn config(&self) -> &ConnectionPoolConfig {
        &self.config
    }

    fn semaphore(&self, tenant_id: &str) -> Arc<Semaphore> {
        self.semaphores
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_connections_per_tenant)))
            .clone()
    }

    async fn acquire_permit(&self, tenant_id: &str) -> Result<OwnedSemaphorePermit> {
        let semaphore = self.semaphore(tenant_id);

        match tokio::time::timeout(self.config.acquire_timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(TenancyError::Unavailable(
                "Connection pool closed".to_string(),
            )),
            Err(_) => Err(TenancyError::Unavailable(format!(
                "Timeout waiting for connection (tenant: {}, timeout: {}ms)",
                tenant_id,
                self.config.acquire_timeout.as_millis()
            ))),
        }
    }

    /// Locate a tenant database, consulting the LRU first.
    pub async fn database(&self, tenant: &TenantContext) -> Result<Arc<TenantDatabase>> {
        let tenant_id = tenant.tenant_id();

        if let Some(db) = self.databases.lock().get(tenant_id) {
            debug!(tenant_id = %tenant_id, "Tenant database cache hit");
            return Ok(Arc::clone(db));
        }

        debug!(tenant_id = %tenant_id, "Tenant database cache miss");
        let located = Arc::new(self.provisioner.locate(tenant).await?);

        let mut cache = self.databases.lock();
        if let Some(existing) = cache.get(tenant_id) {
            return Ok(Arc::clone(existing));
        }
        if cache.len() >= cache.cap().get() {
            if let Some((evicted, _)) = cache.peek_lru() {
                debug!(evicted_tenant = %evicted, tenant_id = %tenant_id, "Evicting LRU tenant database");
            }
        }
        cache.put(tenant_id.to_string(), Arc::clone(&located));
        Ok(located)
    }

    /// Acquire a connection handle for `tenant`.
    ///
    /// # Errors
    ///
    /// - `Unavailable` when no permit frees up within the acquire timeout, or
    ///   when an existing database cannot be opened
    /// - `NotFound` when the tenant has no database
    pub async fn acquire(&self, tenant: &TenantContext) -> Result<TenantConnection> {
        // Backpressure before doing any work
        let permit = self.acquire_permit(tenant.tenant_id()).await?;

        let database = self.database(tenant).await?;
        let opened = {
            let database = Arc::clone(&database);
            tokio::task::spawn_blocking(move || database.open())
                .await
                .map_err(|e| TenancyError::Other(format!("Task join error: {}", e)))?
        };

        let conn = match opened {
            Ok(conn) => conn,
            Err(e) if !database.path().exists() => {
                // Stale cache entry for a dropped database
                self.databases.lock().pop(tenant.tenant_id());
                debug!(tenant_id = %tenant, error = %e, "Tenant database is gone");
                return Err(TenancyError::NotFound(format!(
                    "database for tenant '{}'",
                    tenant
                )));
            }
            Err(e) => {
                warn!(
                    tenant_id = %tenant,
                    path = %database.path().display(),
                    error = %e,
                    "Failed to open tenant database"
                );
                return Err(TenancyError::Unavailable(format!(
                    "database for tenant '{}' could not be opened",
                    tenant
                )));
            }
        };

        debug!(tenant_id = %tenant, "Acquired tenant connection");
        Ok(TenantConnection::new(
            tenant.clone(),
            database.path().to_path_buf(),
            conn,
            permit,
        ))
    }

    /// Forget everything cached for a tenant (after deprovisioning).
    ///
    /// The tenant's semaphore is only dropped once no connection holds a
    /// permit from it, so the per-tenant limit keeps counting live handles.
    ///
    /// Returns true if a database location was cached.
    pub fn invalidate(&self, tenant_id: &str) -> bool {
        let removed = self.databases.lock().pop(tenant_id).is_some();
        let max = self.config.max_connections_per_tenant;
        self.semaphores
            .remove_if(tenant_id, |_, semaphore| semaphore.available_permits() == max);
        if removed {
            info!(tenant_id = %tenant_id, "Invalidated cached tenant database");
        }
        removed
    }

    /// Connections currently held for a tenant.
    pub fn active_connections(&self, tenant_id: &str) -> usize {
        self.semaphores
            .get(tenant_id)
            .map(|s| self.config.max_connections_per_tenant - s.available_permits())
            .unwrap_or(0)
    }

    /// Check if a tenant's database location is cached.
    pub fn is_cached(&self, tenant_id: &str) -> bool {
        self.databases.lock().contains(tenant_id)
    }

    /// Pool statistics.
    pub fn stats(&self) -> TenantPoolStats {
        let cache = self.databases.lock();
        TenantPoolStats {
            capacity: cache.cap().get(),
            cached_databases: cache.len(),
            cached_tenants: cache.iter().map(|(k, _)| k.clone()).collect(),
            tracked_tenants: self.semaphores.len(),
        }
    }
}
