//! Tenant Registry
//!
//! The central directory of tenants and the hostnames mapped to them. It
//! lives in the registry database, separate from every tenant database.
//!
//! # Architecture
//!
//! ```text
//! Registry DB                       Tenant DBs
//! ┌──────────────────┐           ┌─────────────────────┐
//! │ tenants          │──────────▶│ tenantalpha.db      │
//! │ domains          │           ├─────────────────────┤
//! │ owners           │           │ tenantbeta.db       │
//! │ tenant_audit_log │           └─────────────────────┘
//! └──────────────────┘
//! ```
//!
//! Duplicate tenant ids and hostnames are detected only by the database's
//! uniqueness constraints: an insert either succeeds or fails atomically with
//! `DuplicateId` / `DomainConflict`. There is no separate exists-check.
//!
//! `find_by_domain` runs on every tenant request, so hits are kept in an
//! in-memory map that is cleared on every registry write.

use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use storefront_tenancy_core::migrations::{self, central_migrations};
use storefront_tenancy_core::validation::{normalize_hostname, validate_name, validate_tenant_id};
use storefront_tenancy_core::{
    is_unique_violation, now_timestamp, Domain, Result, TenancyError, Tenant, TenantWithDomains,
};
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Audit actions recorded for tenant lifecycle events.
pub mod audit_actions {
    pub const REGISTER: &str = "register";
    pub const ROLLBACK: &str = "rollback";
    pub const DELETE: &str = "delete";
}

/// Audit log entry from the registry database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub tenant_id: String,
    pub actor: String,
    pub details: Option<String>,
}

/// Open the registry database with foreign keys enforced.
pub(crate) fn open_registry(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        store_name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn insert_tenant(conn: &Connection, id: &str, store_name: &str) -> Result<Tenant> {
    let created_at = now_timestamp();
    conn.execute(
        "INSERT INTO tenants (id, store_name, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, store_name, created_at],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            TenancyError::DuplicateId(id.to_string())
        } else {
            TenancyError::from(e)
        }
    })?;

    Ok(Tenant {
        id: id.to_string(),
        store_name: store_name.to_string(),
        created_at,
    })
}

fn insert_domain(conn: &Connection, tenant_id: &str, domain: &str) -> Result<Domain> {
    conn.execute(
        "INSERT INTO domains (domain, tenant_id, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![domain, tenant_id, now_timestamp()],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            TenancyError::DomainConflict(domain.to_string())
        } else {
            TenancyError::from(e)
        }
    })?;

    Ok(Domain {
        domain: domain.to_string(),
        tenant_id: tenant_id.to_string(),
    })
}

fn select_domains(conn: &Connection, tenant_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT domain FROM domains WHERE tenant_id = ?1 ORDER BY id")?;
    let rows = stmt.query_map([tenant_id], |row| row.get(0))?;
    Ok(rows.collect::<std::result::Result<Vec<String>, _>>()?)
}

/// Directory of tenants and their hostnames.
pub struct TenantRegistry {
    db_path: PathBuf,
    /// Hostname → tenant for hits only; cleared on every write
    domain_cache: DashMap<String, Tenant>,
}

impl std::fmt::Debug for TenantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRegistry")
            .field("db_path", &self.db_path)
            .field("cached_domains", &self.domain_cache.len())
            .finish()
    }
}

impl TenantRegistry {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            domain_cache: DashMap::new(),
        }
    }

    /// Path of the registry database.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_registry(&db_path)?;
            f(&conn)
        })
        .await
        .map_err(|e| TenancyError::Other(format!("Task join error: {}", e)))?
    }

    fn invalidate_lookups(&self) {
        self.domain_cache.clear();
    }

    /// Initialize the registry database schema.
    pub async fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TenancyError::Other(format!(
                        "Failed to create registry directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let applied = self
            .with_conn(|conn| migrations::run_migrations(conn, &central_migrations()))
            .await?;

        info!(db_path = %self.db_path.display(), applied, "Initialized registry database");
        Ok(())
    }

    // =========================================================================
    // Tenant Operations
    // =========================================================================

    /// Create a tenant without a domain.
    ///
    /// # Errors
    ///
    /// - `InvalidTenantId` if `id` is not an alphanumeric slug
    /// - `DuplicateId` if `id` is already registered
    pub async fn create_tenant(&self, id: &str, store_name: &str) -> Result<Tenant> {
        validate_tenant_id(id)?;
        validate_name(store_name, "store_name")?;

        let id = id.to_string();
        let store_name = store_name.to_string();
        let tenant = self
            .with_conn(move |conn| insert_tenant(conn, &id, &store_name))
            .await?;

        self.invalidate_lookups();
        info!(tenant_id = %tenant.id, "Created tenant");
        Ok(tenant)
    }

    /// Create a tenant and its primary domain in one transaction.
    ///
    /// Either both rows exist afterwards or neither does.
    pub async fn register_tenant(
        &self,
        id: &str,
        store_name: &str,
        domain: &str,
    ) -> Result<(Tenant, Domain)> {
        validate_tenant_id(id)?;
        validate_name(store_name, "store_name")?;
        let domain = normalize_hostname(domain)?;

        let id = id.to_string();
        let store_name = store_name.to_string();
        let (tenant, domain) = self
            .with_conn(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let tenant = insert_tenant(&tx, &id, &store_name)?;
                let domain = insert_domain(&tx, &id, &domain)?;
                tx.commit()?;
                Ok((tenant, domain))
            })
            .await?;

        self.invalidate_lookups();
        info!(tenant_id = %tenant.id, domain = %domain.domain, "Registered tenant");
        Ok((tenant, domain))
    }

    /// Get a tenant by id.
    pub async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, store_name, created_at FROM tenants WHERE id = ?1",
                    [&id],
                    tenant_from_row,
                )
                .optional()?)
        })
        .await
    }

    /// List tenants with their domains, most recent first.
    pub async fn list_tenants(&self) -> Result<Vec<TenantWithDomains>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, store_name, created_at FROM tenants
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let tenants = stmt
                .query_map([], tenant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            tenants
                .into_iter()
                .map(|tenant| {
                    let domains = select_domains(conn, &tenant.id)?;
                    Ok(TenantWithDomains { tenant, domains })
                })
                .collect()
        })
        .await
    }

    /// Delete a tenant and (by cascade) its domains.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such tenant is registered.
    pub async fn delete_tenant(&self, id: &str) -> Result<Tenant> {
        let tenant_id = id.to_string();
        let tenant = self
            .with_conn(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let tenant = tx
                    .query_row(
                        "SELECT id, store_name, created_at FROM tenants WHERE id = ?1",
                        [&tenant_id],
                        tenant_from_row,
                    )
                    .optional()?
                    .ok_or_else(|| TenancyError::NotFound(format!("tenant '{}'", tenant_id)))?;
                tx.execute("DELETE FROM tenants WHERE id = ?1", [&tenant_id])?;
                tx.commit()?;
                Ok(tenant)
            })
            .await?;

        self.invalidate_lookups();
        info!(tenant_id = %tenant.id, "Deleted tenant");
        Ok(tenant)
    }

    // =========================================================================
    // Domain Operations
    // =========================================================================

    /// Map an additional hostname to an existing tenant.
    ///
    /// # Errors
    ///
    /// - `DomainConflict` if the hostname is already mapped (to any tenant)
    /// - `NotFound` if the tenant does not exist
    pub async fn add_domain(&self, tenant_id: &str, domain: &str) -> Result<Domain> {
        let domain = normalize_hostname(domain)?;
        let tenant_id = tenant_id.to_string();

        let created = self
            .with_conn(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM tenants WHERE id = ?1)",
                    [&tenant_id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(TenancyError::NotFound(format!("tenant '{}'", tenant_id)));
                }
                let created = insert_domain(&tx, &tenant_id, &domain)?;
                tx.commit()?;
                Ok(created)
            })
            .await?;

        self.invalidate_lookups();
        info!(tenant_id = %created.tenant_id, domain = %created.domain, "Added domain");
        Ok(created)
    }

    /// Hostnames mapped to a tenant, in creation order.
    pub async fn domains_for(&self, tenant_id: &str) -> Result<Vec<String>> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| select_domains(conn, &tenant_id))
            .await
    }

    /// Resolve a hostname to its tenant.
    ///
    /// Hostnames are compared after normalization (lowercase, no trailing
    /// dot). Malformed hostnames resolve to `None`.
    pub async fn find_by_domain(&self, host: &str) -> Result<Option<Tenant>> {
        let Ok(host) = normalize_hostname(host) else {
            return Ok(None);
        };

        if let Some(tenant) = self.domain_cache.get(&host) {
            debug!(domain = %host, tenant_id = %tenant.id, "Domain lookup cache hit");
            return Ok(Some(tenant.clone()));
        }

        let lookup = host.clone();
        let found = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT t.id, t.store_name, t.created_at
                         FROM domains d JOIN tenants t ON t.id = d.tenant_id
                         WHERE d.domain = ?1",
                        [&lookup],
                        tenant_from_row,
                    )
                    .optional()?)
            })
            .await?;

        if let Some(tenant) = &found {
            self.domain_cache.insert(host, tenant.clone());
        }
        Ok(found)
    }

    // =========================================================================
    // Audit Logging
    // =========================================================================

    /// Record a tenant lifecycle event.
    pub async fn audit_log(
        &self,
        action: &str,
        tenant_id: &str,
        actor: &str,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let action = action.to_string();
        let tenant_id = tenant_id.to_string();
        let actor = actor.to_string();
        let details = details.map(|d| d.to_string());

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tenant_audit_log (action, tenant_id, actor, details)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![action, tenant_id, actor, details],
            )?;
            Ok(())
        })
        .await
    }

    /// Audit entries, newest first, optionally for one tenant.
    pub async fn get_audit_log(
        &self,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        let tenant_id = tenant_id.map(String::from);
        let limit = limit as i64;

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, action, tenant_id, actor, details
                 FROM tenant_audit_log
                 WHERE ?1 IS NULL OR tenant_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![tenant_id, limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    action: row.get(2)?,
                    tenant_id: row.get(3)?,
                    actor: row.get(4)?,
                    details: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, TenantRegistry) {
        let dir = TempDir::new().unwrap();
        let registry = TenantRegistry::new(dir.path().join("central.db"));
        registry.initialize().await.unwrap();
        (dir, registry)
    }

    #[tokio::test]
    async fn test_create_and_get_tenant() {
        let (_dir, registry) = setup().await;
        let tenant = registry.create_tenant("alpha", "Alpha Store").await.unwrap();
        assert_eq!(tenant.id, "alpha");

        let fetched = registry.get_tenant("alpha").await.unwrap().unwrap();
        assert_eq!(fetched, tenant);
        assert!(registry.get_tenant("beta").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let (_dir, registry) = setup().await;
        registry.create_tenant("alpha", "Alpha Store").await.unwrap();

        let err = registry.create_tenant("alpha", "Another").await.unwrap_err();
        assert!(matches!(err, TenancyError::DuplicateId(ref id) if id == "alpha"));
    }

    #[tokio::test]
    async fn test_invalid_ids_are_rejected() {
        let (_dir, registry) = setup().await;
        for id in ["", "al-pha", "../etc", "alpha;drop", "Alpha"] {
            let err = registry.create_tenant(id, "Store").await.unwrap_err();
            assert!(matches!(err, TenancyError::InvalidTenantId(_)), "{}", id);
        }
        assert!(registry.list_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_exactly_one_winner() {
        let (_dir, registry) = setup().await;
        let registry = Arc::new(registry);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry
                    .register_tenant("gamma", &format!("Store {}", i), "gamma.localhost")
                    .await
            }));
        }

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(TenancyError::DuplicateId(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(registry.domains_for("gamma").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_is_atomic_on_domain_conflict() {
        let (_dir, registry) = setup().await;
        registry
            .register_tenant("alpha", "Alpha", "shop.localhost")
            .await
            .unwrap();

        let err = registry
            .register_tenant("beta", "Beta", "SHOP.localhost")
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::DomainConflict(_)));

        // No tenant row left behind for the failed registration
        assert!(registry.get_tenant("beta").await.unwrap().is_none());
        let owner = registry.find_by_domain("shop.localhost").await.unwrap().unwrap();
        assert_eq!(owner.id, "alpha");
    }

    #[tokio::test]
    async fn test_add_domain_conflict_keeps_existing_mapping() {
        let (_dir, registry) = setup().await;
        registry
            .register_tenant("alpha", "Alpha", "alpha.localhost")
            .await
            .unwrap();
        registry
            .register_tenant("beta", "Beta", "beta.localhost")
            .await
            .unwrap();

        let err = registry
            .add_domain("beta", "alpha.localhost")
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::DomainConflict(_)));

        let resolved = registry.find_by_domain("alpha.localhost").await.unwrap().unwrap();
        assert_eq!(resolved.id, "alpha");
        assert_eq!(registry.domains_for("beta").await.unwrap(), vec!["beta.localhost"]);

        let err = registry.add_domain("ghost", "ghost.localhost").await.unwrap_err();
        assert!(matches!(err, TenancyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_by_domain_normalizes_and_caches() {
        let (_dir, registry) = setup().await;
        registry
            .register_tenant("alpha", "Alpha", "alpha.localhost")
            .await
            .unwrap();

        let found = registry.find_by_domain("ALPHA.localhost.").await.unwrap();
        assert_eq!(found.unwrap().id, "alpha");
        assert!(registry.find_by_domain("beta.localhost").await.unwrap().is_none());
        assert!(registry.find_by_domain("not a host").await.unwrap().is_none());

        // Cached hit is dropped when the tenant is deleted
        registry.delete_tenant("alpha").await.unwrap();
        assert!(registry.find_by_domain("alpha.localhost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_tenants_latest_first_with_domains() {
        let (_dir, registry) = setup().await;
        registry.register_tenant("first", "First", "first.localhost").await.unwrap();
        registry.register_tenant("second", "Second", "second.localhost").await.unwrap();
        registry.add_domain("second", "shop.example.com").await.unwrap();

        let tenants = registry.list_tenants().await.unwrap();
        let ids: Vec<_> = tenants.iter().map(|t| t.tenant.id.as_str()).collect();
        assert_eq!(ids, vec!["second", "first"]);
        assert_eq!(
            tenants[0].domains,
            vec!["second.localhost".to_string(), "shop.example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_missing_tenant_is_not_found() {
        let (_dir, registry) = setup().await;
        let err = registry.delete_tenant("ghost").await.unwrap_err();
        assert!(matches!(err, TenancyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_audit_log() {
        let (_dir, registry) = setup().await;
        registry
            .audit_log(
                audit_actions::REGISTER,
                "alpha",
                "owner@example.com",
                Some(serde_json::json!({"domain": "alpha.localhost"})),
            )
            .await
            .unwrap();
        registry
            .audit_log(audit_actions::DELETE, "beta", "owner@example.com", None)
            .await
            .unwrap();

        let all = registry.get_audit_log(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action, "delete");

        let alpha = registry.get_audit_log(Some("alpha"), 10).await.unwrap();
        assert_eq!(alpha.len(), 1);
        assert!(alpha[0].details.as_deref().unwrap().contains("alpha.localhost"));
    }
}
