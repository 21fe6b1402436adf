//! Central owner accounts.
//!
//! Owners sign up on a central domain and create stores from there. Their
//! records live in the registry database; only the bootstrap step ever copies
//! one of them into a tenant database.

use crate::passwords::{hash_password, verify_password};
use crate::registry::open_registry;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Deserialize;
use std::path::PathBuf;
use storefront_tenancy_core::validation::{validate_email, validate_name, validate_password};
use storefront_tenancy_core::{is_unique_violation, now_timestamp, CentralOwner, Result, TenancyError};
use tracing::info;

/// Owner sign-up form.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterOwnerRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

fn owner_from_row(row: &Row<'_>) -> rusqlite::Result<CentralOwner> {
    Ok(CentralOwner {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Owner accounts stored in the registry database.
#[derive(Debug, Clone)]
pub struct CentralAccounts {
    db_path: PathBuf,
    bcrypt_cost: u32,
}

impl CentralAccounts {
    pub fn new(db_path: impl Into<PathBuf>, bcrypt_cost: u32) -> Self {
        Self {
            db_path: db_path.into(),
            bcrypt_cost,
        }
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

    /// Register a new owner.
    ///
    /// # Errors
    ///
    /// `ValidationError` for malformed input or an email that is already taken.
    pub async fn register_owner(&self, req: RegisterOwnerRequest) -> Result<CentralOwner> {
        validate_name(&req.name, "name")?;
        let email = req.email.trim().to_lowercase();
        validate_email(&email)?;
        validate_password(&req.password, &req.password_confirmation)?;

        let password_hash = hash_password(&req.password, self.bcrypt_cost).await?;
        let name = req.name.trim().to_string();

        let owner = self
            .with_conn(move |conn| {
                let created_at = now_timestamp();
                conn.execute(
                    "INSERT INTO owners (name, email, password_hash, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![name, email, password_hash, created_at],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        TenancyError::invalid("email", "The email has already been taken.")
                    } else {
                        TenancyError::from(e)
                    }
                })?;

                Ok(CentralOwner {
                    id: conn.last_insert_rowid(),
                    name,
                    email,
                    password_hash,
                    created_at,
                })
            })
            .await?;

        info!(owner_id = owner.id, "Registered central owner");
        Ok(owner)
    }

    /// Look up an owner by id.
    pub async fn get_owner(&self, id: i64) -> Result<Option<CentralOwner>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, email, password_hash, created_at FROM owners WHERE id = ?1",
                    [id],
                    owner_from_row,
                )
                .optional()?)
        })
        .await
    }

    /// Look up an owner by email (case-insensitive).
    pub async fn find_by_email(&self, email: &str) -> Result<Option<CentralOwner>> {
        let email = email.trim().to_lowercase();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, email, password_hash, created_at FROM owners WHERE email = ?1",
                    [&email],
                    owner_from_row,
                )
                .optional()?)
        })
        .await
    }

    /// Check owner credentials.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` (field `email`) for an unknown email or a wrong password.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<CentralOwner> {
        let failed = || TenancyError::AuthenticationFailed {
            field: "email".to_string(),
        };

        let owner = self.find_by_email(email).await?.ok_or_else(failed)?;
        if !verify_password(password, &owner.password_hash).await? {
            return Err(failed());
        }
        Ok(owner)
    }
}
