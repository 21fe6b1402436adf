//! Request-scoped tenant connection handle.
//!
//! A [`TenantConnection`] wraps exactly one open SQLite connection to exactly
//! one tenant database, plus the pool permit that admitted it. It is the only
//! way repository code reaches tenant data: every query names the handle it
//! runs against, so nothing can fall back to another tenant or to the
//! registry.
//!
//! Cloning shares the same underlying connection (the handle lives in axum
//! request extensions). [`release`](TenantConnection::release) closes the
//! connection and returns the permit; any clone used after that fails.

use crate::TenantContext;
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storefront_tenancy_core::{Result, TenancyError};
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

struct ConnectionInner {
    tenant: TenantContext,
    database_path: PathBuf,
    conn: Mutex<Option<Connection>>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    acquired_at: Instant,
}

impl ConnectionInner {
    fn release(&self) -> bool {
        let conn = self.conn.lock().take();
        let permit = self.permit.lock().take();
        let released = conn.is_some() || permit.is_some();
        drop(conn);
        drop(permit);
        released
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if self.release() {
            debug!(
                tenant_id = %self.tenant,
                hold_time_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Releasing tenant connection on drop"
            );
        }
    }
}

/// An open, permit-holding connection to one tenant's database.
#[derive(Clone)]
pub struct TenantConnection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("tenant_id", &self.inner.tenant.tenant_id())
            .field("released", &self.is_released())
            .field("hold_time_ms", &self.inner.acquired_at.elapsed().as_millis())
            .finish()
    }
}

impl TenantConnection {
    pub(crate) fn new(
        tenant: TenantContext,
        database_path: PathBuf,
        conn: Connection,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                tenant,
                database_path,
                conn: Mutex::new(Some(conn)),
                permit: Mutex::new(Some(permit)),
                acquired_at: Instant::now(),
            }),
        }
    }

    /// Tenant this connection is bound to.
    pub fn tenant(&self) -> &TenantContext {
        &self.inner.tenant
    }

    /// Tenant identifier.
    pub fn tenant_id(&self) -> &str {
        self.inner.tenant.tenant_id()
    }

    /// Path of the tenant database file.
    pub fn database_path(&self) -> &Path {
        &self.inner.database_path
    }

    /// How long this handle has been held.
    pub fn hold_time(&self) -> Duration {
        self.inner.acquired_at.elapsed()
    }

    /// Whether [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.inner.conn.lock().is_none()
    }

    /// Close the connection and return the pool permit.
    ///
    /// Idempotent. Clones of this handle observe the release.
    pub fn release(&self) {
        if self.inner.release() {
            debug!(
                tenant_id = %self.inner.tenant,
                hold_time_ms = self.hold_time().as_millis() as u64,
                "Released tenant connection"
            );
        }
    }

    /// Run `f` against the tenant database on the blocking pool.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.conn.lock();
            let conn = guard.as_ref().ok_or_else(|| released_error(&inner.tenant))?;
            f(conn)
        })
        .await
        .map_err(|e| TenancyError::Other(format!("Task join error: {}", e)))?
    }

    /// Run `f` inside a transaction, committing only if it returns `Ok`.
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_connection(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }
}

fn released_error(tenant: &TenantContext) -> TenancyError {
    TenancyError::Other(format!(
        "connection for tenant '{}' was already released",
        tenant
    ))
}
