//! Admin bootstrap for a freshly provisioned tenant.
//!
//! The one data flow that crosses databases: a central owner record becomes
//! the first admin user of the new tenant. The connection is an explicit
//! parameter; nothing here can reach any other tenant.

use storefront_tenancy_core::{now_timestamp, CentralOwner, Result, TenancyError, TenantUser, UserRole};
use storefront_tenancy_storage::TenantConnection;
use tracing::info;

/// Create the tenant's admin account from the owner's credentials.
///
/// Name, email and password hash are copied verbatim. The hash is never
/// re-derived, so the owner signs in to the store with the same password.
///
/// # Errors
///
/// `BootstrapFailed` for any failure; nothing is committed in that case.
pub async fn bootstrap_admin(conn: &TenantConnection, owner: &CentralOwner) -> Result<TenantUser> {
    if owner.password_hash.is_empty() {
        return Err(TenancyError::BootstrapFailed(format!(
            "owner {} has no password hash",
            owner.id
        )));
    }

    let name = owner.name.clone();
    let email = owner.email.clone();
    let password_hash = owner.password_hash.clone();

    let user = conn
        .with_transaction(move |tx| {
            let created_at = now_timestamp();
            tx.execute(
                "INSERT INTO users (name, email, password_hash, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![name, email, password_hash, UserRole::Admin.as_str(), created_at],
            )?;
            Ok(TenantUser {
                id: tx.last_insert_rowid(),
                name,
                email,
                password_hash,
                role: UserRole::Admin,
                created_at,
            })
        })
        .await
        .map_err(|e| match e {
            TenancyError::BootstrapFailed(_) => e,
            other => TenancyError::BootstrapFailed(other.to_string()),
        })?;

    info!(
        tenant_id = %conn.tenant(),
        user_id = user.id,
        owner_id = owner.id,
        "Bootstrapped tenant admin"
    );
    Ok(user)
}
