//! Per-tenant database provisioning.
//!
//! Each tenant owns one SQLite file whose path is derived from a template
//! containing `{tenant_id}`:
//!
//! ```text
//! location template: "data/tenants/tenant{tenant_id}.db"
//!        │
//!        ├── alpha → data/tenants/tenantalpha.db
//!        └── beta  → data/tenants/tenantbeta.db
//! ```
//!
//! `provision` creates the file exclusively, applies the tenant migration set,
//! and returns a [`TenantDatabase`]. A failed or timed-out provision removes
//! whatever it created, so no half-migrated database survives. `deprovision`
//! is idempotent.

use crate::TenantContext;
use rusqlite::{Connection, OpenFlags};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storefront_tenancy_core::migrations::{self, Migration, MigrationVersion};
use storefront_tenancy_core::{validation, Result, TenancyError};
use tracing::{debug, info, warn};

/// Placeholder for tenant ID in location templates.
pub const TENANT_ID_PLACEHOLDER: &str = "{tenant_id}";

/// Default provisioning timeout.
pub const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(30);

// Hand-off between the blocking provision task and the timeout path
const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

/// Files SQLite may leave next to a database.
const SIDECAR_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];

/// A provisioned tenant database.
///
/// Knows where the database lives; opening it is explicit via [`open`](Self::open).
#[derive(Debug, Clone)]
pub struct TenantDatabase {
    tenant: TenantContext,
    path: PathBuf,
    schema_version: MigrationVersion,
}

impl TenantDatabase {
    /// Tenant owning this database.
    pub fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    /// Path of the SQLite file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest migration applied when the database was provisioned or located.
    pub fn schema_version(&self) -> MigrationVersion {
        self.schema_version
    }

    /// Open a read-write connection.
    ///
    /// Never creates the file: a deprovisioned database fails to open instead
    /// of silently coming back empty.
    pub fn open(&self) -> Result<Connection> {
        open_existing(&self.path)
    }
}

fn open_existing(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// Creates and destroys per-tenant databases.
#[derive(Debug, Clone)]
pub struct DatabaseProvisioner {
    location_template: String,
    migrations: Arc<Vec<Migration>>,
    timeout: Duration,
}

impl DatabaseProvisioner {
    /// Create a provisioner using the standard tenant migration set.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the template lacks `{tenant_id}` or
    /// contains `..` segments.
    pub fn new(location_template: impl Into<String>) -> Result<Self> {
        let template = location_template.into();

        if !template.contains(TENANT_ID_PLACEHOLDER) {
            return Err(TenancyError::invalid(
                "tenant_db_template",
                format!("template must contain '{}'", TENANT_ID_PLACEHOLDER),
            ));
        }
        validation::validate_file_path(&template)?;

        Ok(Self {
            location_template: template,
            migrations: Arc::new(migrations::tenant_migrations()),
            timeout: DEFAULT_PROVISION_TIMEOUT,
        })
    }

    /// Replace the migration set applied to new databases.
    pub fn with_migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.migrations = Arc::new(migrations);
        self
    }

    /// Bound the whole provisioning step.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Location template with `{tenant_id}` placeholder.
    pub fn location_template(&self) -> &str {
        &self.location_template
    }

    /// Resolve the database path for a tenant.
    pub fn database_path(&self, tenant: &TenantContext) -> PathBuf {
        PathBuf::from(
            self.location_template
                .replace(TENANT_ID_PLACEHOLDER, tenant.tenant_id()),
        )
    }

    /// Check whether a tenant's database file exists.
    pub fn exists(&self, tenant: &TenantContext) -> bool {
        self.database_path(tenant).exists()
    }

    /// Locate an already provisioned database.
    ///
    /// # Errors
    ///
    /// `NotFound` if the file does not exist.
    pub async fn locate(&self, tenant: &TenantContext) -> Result<TenantDatabase> {
        let path = self.database_path(tenant);
        let tenant = tenant.clone();

        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Err(TenancyError::NotFound(format!(
                    "database for tenant '{}'",
                    tenant
                )));
            }
            let conn = open_existing(&path)?;
            let schema_version = migrations::get_schema_version(&conn)?;
            Ok(TenantDatabase {
                tenant,
                path,
                schema_version,
            })
        })
        .await
        .map_err(|e| TenancyError::Other(format!("Task join error: {}", e)))?
    }

    /// Create and migrate a new, empty database for `tenant`.
    ///
    /// # Errors
    ///
    /// `ProvisionFailed` if the file already exists, any migration fails, or
    /// the configured timeout elapses. Files created by the failed attempt
    /// are removed before returning; a pre-existing file is left untouched.
    pub async fn provision(&self, tenant: &TenantContext) -> Result<TenantDatabase> {
        let path = self.database_path(tenant);
        let state = Arc::new(AtomicU8::new(RUNNING));

        let mut task = {
            let path = path.clone();
            let migrations = Arc::clone(&self.migrations);
            let state = Arc::clone(&state);
            tokio::task::spawn_blocking(move || provision_blocking(&path, &migrations, &state))
        };

        let joined = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                if state
                    .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    // The blocking task removes its own file once it sees the flag
                    warn!(
                        tenant_id = %tenant,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Tenant database provisioning timed out"
                    );
                    return Err(TenancyError::ProvisionFailed(format!(
                        "timed out after {}ms",
                        self.timeout.as_millis()
                    )));
                }
                // Finished at the deadline; take its result
                task.await
            }
        };

        match joined {
            Ok(Ok(schema_version)) => {
                info!(
                    tenant_id = %tenant,
                    path = %path.display(),
                    schema_version,
                    "Provisioned tenant database"
                );
                Ok(TenantDatabase {
                    tenant: tenant.clone(),
                    path,
                    schema_version,
                })
            }
            Ok(Err(e)) => {
                warn!(tenant_id = %tenant, error = %e, "Tenant database provisioning failed");
                Err(match e {
                    TenancyError::ProvisionFailed(_) => e,
                    other => TenancyError::ProvisionFailed(other.to_string()),
                })
            }
            Err(join_err) => Err(TenancyError::ProvisionFailed(format!(
                "Task join error: {}",
                join_err
            ))),
        }
    }

    /// Physically drop a tenant's database.
    ///
    /// Idempotent: returns `Ok(false)` when there was nothing to remove.
    pub async fn deprovision(&self, tenant: &TenantContext) -> Result<bool> {
        let path = self.database_path(tenant);
        let tenant_id = tenant.tenant_id().to_string();

        let removed = tokio::task::spawn_blocking(move || remove_database_files(&path))
            .await
            .map_err(|e| TenancyError::Other(format!("Task join error: {}", e)))?;

        if removed {
            info!(tenant_id = %tenant_id, "Dropped tenant database");
        } else {
            debug!(tenant_id = %tenant_id, "No tenant database to drop");
        }
        Ok(removed)
    }
}

fn provision_blocking(
    path: &Path,
    migrations: &[Migration],
    state: &AtomicU8,
) -> Result<MigrationVersion> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TenancyError::ProvisionFailed(format!(
                    "cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    // Exclusive create: never adopt or overwrite an existing database
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            TenancyError::ProvisionFailed(format!(
                "cannot create database {}: {}",
                path.display(),
                e
            ))
        })?;

    let outcome = migrate_new_database(path, migrations, state);

    match outcome {
        Ok(version)
            if state
                .compare_exchange(RUNNING, COMPLETED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok() =>
        {
            Ok(version)
        }
        Ok(_) => {
            remove_database_files(path);
            Err(TenancyError::ProvisionFailed("cancelled".to_string()))
        }
        Err(e) => {
            remove_database_files(path);
            Err(TenancyError::ProvisionFailed(e.to_string()))
        }
    }
}

fn migrate_new_database(
    path: &Path,
    migrations: &[Migration],
    state: &AtomicU8,
) -> Result<MigrationVersion> {
    let conn = open_existing(path)?;

    for migration in migrations {
        if state.load(Ordering::SeqCst) == CANCELLED {
            return Err(TenancyError::Other("cancelled".to_string()));
        }
        migrations::run_migrations(&conn, std::slice::from_ref(migration))?;
    }

    migrations::get_schema_version(&conn)
}

/// Remove a database file and its sidecars. Returns true if the main file existed.
fn remove_database_files(path: &Path) -> bool {
    let removed = match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove database file");
            false
        }
    };

    for suffix in SIDECAR_SUFFIXES {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(sidecar));
    }

    removed
}
