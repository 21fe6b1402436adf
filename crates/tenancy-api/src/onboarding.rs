//! Tenant onboarding saga.
//!
//! Creating a store touches two independent resources: a row in the registry
//! database and a physical tenant database. The steps are:
//!
//! 1. insert the tenant and its primary domain (one registry transaction)
//! 2. provision and migrate the tenant database
//! 3. bootstrap the admin account from the owner's credentials
//!
//! Each completed step is recorded in a [`SagaLog`]. When a later step fails,
//! compensations run in reverse order and the caller gets a single
//! `ProvisionFailed`. A tenant id is only ever returned for a store with a
//! working, admin-populated database.

use crate::bootstrap::bootstrap_admin;
use crate::config::AppConfig;
use crate::registry::{audit_actions, TenantRegistry};
use crate::sessions::SessionStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storefront_tenancy_core::validation::validate_name;
use storefront_tenancy_core::{CentralOwner, Domain, Result, TenancyError, Tenant};
use storefront_tenancy_storage::{ScopedCache, TenantConnectionPool, TenantContext};
use tracing::{error, info, warn};

/// Store creation form submitted by an authenticated owner.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterTenantRequest {
    pub store_name: String,
    /// Becomes both the tenant id and the first label of the store domain
    pub subdomain: String,
}

/// A fully onboarded store.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardedTenant {
    pub tenant: Tenant,
    pub domain: Domain,
    /// Public URL of the store, where the owner is sent next
    pub url: String,
}

/// A completed saga step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    RegistryRow,
    DatabaseProvisioned,
    AdminSeeded,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::RegistryRow => "registry_row",
            SagaStep::DatabaseProvisioned => "database_provisioned",
            SagaStep::AdminSeeded => "admin_seeded",
        }
    }
}

/// Checkpoints of one onboarding run.
#[derive(Debug, Default)]
pub struct SagaLog {
    completed: Vec<SagaStep>,
}

impl SagaLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: SagaStep) {
        self.completed.push(step);
    }

    pub fn completed(&self) -> &[SagaStep] {
        &self.completed
    }

    pub fn contains(&self, step: SagaStep) -> bool {
        self.completed.contains(&step)
    }

    /// Completed steps, most recent first.
    fn unwind(&self) -> impl Iterator<Item = SagaStep> + '_ {
        self.completed.iter().rev().copied()
    }
}

/// Runs store creation and teardown across the registry and the tenant databases.
#[derive(Clone)]
pub struct TenantOnboarding {
    registry: Arc<TenantRegistry>,
    pool: Arc<TenantConnectionPool>,
    cache: ScopedCache,
    sessions: Arc<SessionStore>,
    config: Arc<AppConfig>,
}

impl TenantOnboarding {
    pub fn new(
        registry: Arc<TenantRegistry>,
        pool: Arc<TenantConnectionPool>,
        cache: ScopedCache,
        sessions: Arc<SessionStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            registry,
            pool,
            cache,
            sessions,
            config,
        }
    }

    fn revoke_sessions(&self, tenant: &TenantContext) {
        let revoked = self.sessions.revoke_tenant(tenant.tenant_id());
        if revoked > 0 {
            info!(tenant_id = %tenant, revoked, "Revoked tenant sessions");
        }
    }

    /// Create a store for `owner`.
    ///
    /// # Errors
    ///
    /// - Validation errors (`InvalidTenantId`, `DuplicateId`, `DomainConflict`,
    ///   field errors) before anything is created
    /// - `ProvisionFailed` once a later step failed and was rolled back
    pub async fn register(
        &self,
        owner: &CentralOwner,
        req: RegisterTenantRequest,
    ) -> Result<OnboardedTenant> {
        let store_name = req.store_name.trim().to_string();
        validate_name(&store_name, "store_name")?;
        let tenant_ctx = TenantContext::new(req.subdomain.trim())?;
        let domain = self.config.tenant_domain(tenant_ctx.tenant_id());

        // Step 1 errors are validation-class and leave nothing behind.
        let (tenant, domain) = self
            .registry
            .register_tenant(tenant_ctx.tenant_id(), &store_name, &domain)
            .await?;

        let mut saga = SagaLog::new();
        saga.record(SagaStep::RegistryRow);

        if let Err(e) = self.provision_and_seed(&tenant_ctx, owner, &mut saga).await {
            error!(
                tenant_id = %tenant_ctx,
                owner_id = owner.id,
                failed_after = ?saga.completed().last().map(SagaStep::as_str),
                error = %e,
                "Tenant onboarding failed, rolling back"
            );
            self.compensate(&tenant_ctx, &saga, &owner.email, &e).await;
            return Err(match e {
                TenancyError::ProvisionFailed(_) => e,
                other => TenancyError::ProvisionFailed(other.to_string()),
            });
        }

        if let Err(e) = self
            .registry
            .audit_log(
                audit_actions::REGISTER,
                tenant.id.as_str(),
                &owner.email,
                Some(serde_json::json!({
                    "store_name": tenant.store_name,
                    "domain": domain.domain,
                })),
            )
            .await
        {
            warn!(tenant_id = %tenant.id, error = %e, "Failed to write audit entry");
        }

        info!(
            tenant_id = %tenant.id,
            domain = %domain.domain,
            owner_id = owner.id,
            "Onboarded tenant"
        );

        let url = self.config.tenant_url(&domain.domain);
        Ok(OnboardedTenant {
            tenant,
            domain,
            url,
        })
    }

    async fn provision_and_seed(
        &self,
        tenant: &TenantContext,
        owner: &CentralOwner,
        saga: &mut SagaLog,
    ) -> Result<()> {
        self.pool.provisioner().provision(tenant).await?;
        saga.record(SagaStep::DatabaseProvisioned);

        let conn = self.pool.acquire(tenant).await?;
        let seeded = bootstrap_admin(&conn, owner).await;
        conn.release();
        seeded?;
        saga.record(SagaStep::AdminSeeded);

        Ok(())
    }

    /// Undo completed steps in reverse order. Every step tolerates already
    /// being undone.
    async fn compensate(
        &self,
        tenant: &TenantContext,
        saga: &SagaLog,
        actor: &str,
        cause: &TenancyError,
    ) {
        for step in saga.unwind() {
            match step {
                // The admin row lives in the tenant database, dropped next.
                SagaStep::AdminSeeded => {}
                SagaStep::DatabaseProvisioned => {
                    self.pool.invalidate(tenant.tenant_id());
                    match self.pool.provisioner().deprovision(tenant).await {
                        Ok(_) => info!(tenant_id = %tenant, "Rolled back tenant database"),
                        Err(e) => error!(
                            tenant_id = %tenant,
                            error = %e,
                            "Failed to drop tenant database during rollback"
                        ),
                    }
                }
                SagaStep::RegistryRow => {
                    match self.registry.delete_tenant(tenant.tenant_id()).await {
                        Ok(_) | Err(TenancyError::NotFound(_)) => {
                            info!(tenant_id = %tenant, "Rolled back registry row")
                        }
                        Err(e) => error!(
                            tenant_id = %tenant,
                            error = %e,
                            "Failed to delete registry row during rollback"
                        ),
                    }
                    self.revoke_sessions(tenant);
                }
            }
        }

        let details = serde_json::json!({
            "completed": saga.completed().iter().map(SagaStep::as_str).collect::<Vec<_>>(),
            "error": cause.kind(),
        });
        if let Err(e) = self
            .registry
            .audit_log(audit_actions::ROLLBACK, tenant.tenant_id(), actor, Some(details))
            .await
        {
            warn!(tenant_id = %tenant, error = %e, "Failed to write audit entry");
        }
    }

    /// Remove a store: registry row, domains, database, sessions, and cached entries.
    ///
    /// The database is dropped even if the registry row was already gone.
    ///
    /// # Errors
    ///
    /// `NotFound` if no registry row existed.
    pub async fn destroy(&self, tenant_id: &str, actor: &str) -> Result<Tenant> {
        let tenant_ctx = TenantContext::new(tenant_id)?;

        let deleted = self.registry.delete_tenant(tenant_ctx.tenant_id()).await;

        self.revoke_sessions(&tenant_ctx);
        self.pool.invalidate(tenant_ctx.tenant_id());
        let dropped = self.pool.provisioner().deprovision(&tenant_ctx).await?;
        if let Err(e) = self.cache.invalidate(&tenant_ctx).await {
            warn!(tenant_id = %tenant_ctx, error = %e, "Failed to flush tenant cache");
        }

        let tenant = deleted?;
        if let Err(e) = self
            .registry
            .audit_log(
                audit_actions::DELETE,
                tenant_ctx.tenant_id(),
                actor,
                Some(serde_json::json!({ "database_dropped": dropped })),
            )
            .await
        {
            warn!(tenant_id = %tenant_ctx, error = %e, "Failed to write audit entry");
        }

        info!(tenant_id = %tenant_ctx, dropped, "Destroyed tenant");
        Ok(tenant)
    }
}
