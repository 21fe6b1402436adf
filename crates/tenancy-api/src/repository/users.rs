//! Store users (admins and customers) of one tenant.

use crate::passwords::{hash_password, verify_password};
use rusqlite::{OptionalExtension, Row};
use serde::Deserialize;
use storefront_tenancy_core::validation::{validate_email, validate_name, validate_password};
use storefront_tenancy_core::{
    is_unique_violation, now_timestamp, Result, TenancyError, TenantUser, UserRole,
};
use storefront_tenancy_storage::TenantConnection;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, created_at";

/// Customer sign-up form on a store domain.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<TenantUser> {
    let role: String = row.get(4)?;
    Ok(TenantUser {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: role.parse().unwrap_or_default(),
        created_at: row.get(5)?,
    })
}

/// Register a customer in this tenant.
///
/// Emails are unique per tenant only; the same address may exist in other stores.
pub async fn create_customer(
    conn: &TenantConnection,
    customer: NewCustomer,
    bcrypt_cost: u32,
) -> Result<TenantUser> {
    validate_name(&customer.name, "name")?;
    let email = customer.email.trim().to_lowercase();
    validate_email(&email)?;
    validate_password(&customer.password, &customer.password_confirmation)?;

    let password_hash = hash_password(&customer.password, bcrypt_cost).await?;
    let name = customer.name.trim().to_string();

    conn.with_connection(move |c| {
        let created_at = now_timestamp();
        c.execute(
            "INSERT INTO users (name, email, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                name,
                email,
                password_hash,
                UserRole::Customer.as_str(),
                created_at
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                TenancyError::invalid("email", "The email has already been taken.")
            } else {
                TenancyError::from(e)
            }
        })?;

        Ok(TenantUser {
            id: c.last_insert_rowid(),
            name,
            email,
            password_hash,
            role: UserRole::Customer,
            created_at,
        })
    })
    .await
}

pub async fn find_by_email(conn: &TenantConnection, email: &str) -> Result<Option<TenantUser>> {
    let email = email.trim().to_lowercase();
    conn.with_connection(move |c| {
        Ok(c.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            [&email],
            user_from_row,
        )
        .optional()?)
    })
    .await
}

pub async fn find_by_id(conn: &TenantConnection, id: i64) -> Result<Option<TenantUser>> {
    conn.with_connection(move |c| {
        Ok(c.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [id],
            user_from_row,
        )
        .optional()?)
    })
    .await
}

/// Check credentials against this tenant's users only.
///
/// # Errors
///
/// `AuthenticationFailed` (field `email`) for an unknown email or wrong password.
pub async fn authenticate(
    conn: &TenantConnection,
    email: &str,
    password: &str,
) -> Result<TenantUser> {
    let failed = || TenancyError::AuthenticationFailed {
        field: "email".to_string(),
    };

    let user = find_by_email(conn, email).await?.ok_or_else(failed)?;
    if !verify_password(password, &user.password_hash).await? {
        return Err(failed());
    }
    Ok(user)
}
