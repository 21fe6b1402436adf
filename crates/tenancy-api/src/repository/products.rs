//! Store catalog.

use rusqlite::{OptionalExtension, Row};
use serde::Deserialize;
use storefront_tenancy_core::validation::validate_product;
use storefront_tenancy_core::{now_timestamp, Product, Result, TenancyError};
use storefront_tenancy_storage::TenantConnection;

const PRODUCT_COLUMNS: &str =
    "id, name, description, price_cents, stock, image, created_at, updated_at";

/// Fields accepted on create and update.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub image: Option<String>,
}

impl NewProduct {
    fn validate(&self) -> Result<()> {
        validate_product(
            &self.name,
            self.description.as_deref(),
            self.price_cents,
            self.stock,
        )
    }
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        price_cents: row.get(3)?,
        stock: row.get(4)?,
        image: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn not_found(id: i64) -> TenancyError {
    TenancyError::NotFound(format!("product {}", id))
}

/// Products, newest first.
pub async fn list_latest(conn: &TenantConnection) -> Result<Vec<Product>> {
    conn.with_connection(|c| {
        let mut stmt = c.prepare(&format!(
            "SELECT {} FROM products ORDER BY created_at DESC, id DESC",
            PRODUCT_COLUMNS
        ))?;
        let rows = stmt.query_map([], product_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

pub async fn get(conn: &TenantConnection, id: i64) -> Result<Option<Product>> {
    conn.with_connection(move |c| {
        Ok(c.query_row(
            &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
            [id],
            product_from_row,
        )
        .optional()?)
    })
    .await
}

pub async fn create(conn: &TenantConnection, product: NewProduct) -> Result<Product> {
    product.validate()?;

    conn.with_connection(move |c| {
        let now = now_timestamp();
        c.execute(
            "INSERT INTO products (name, description, price_cents, stock, image, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                product.name.trim(),
                product.description,
                product.price_cents,
                product.stock,
                product.image,
                now
            ],
        )?;
        let id = c.last_insert_rowid();
        Ok(c.query_row(
            &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
            [id],
            product_from_row,
        )?)
    })
    .await
}

/// Replace a product's fields.
///
/// # Errors
///
/// `NotFound` if `id` does not exist in this tenant.
pub async fn update(conn: &TenantConnection, id: i64, product: NewProduct) -> Result<Product> {
    product.validate()?;

    conn.with_connection(move |c| {
        let changed = c.execute(
            "UPDATE products
             SET name = ?1, description = ?2, price_cents = ?3, stock = ?4, image = ?5, updated_at = ?6
             WHERE id = ?7",
            rusqlite::params![
                product.name.trim(),
                product.description,
                product.price_cents,
                product.stock,
                product.image,
                now_timestamp(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(not_found(id));
        }
        Ok(c.query_row(
            &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
            [id],
            product_from_row,
        )?)
    })
    .await
}

/// Delete a product (and, by cascade, cart lines referencing it).
pub async fn delete(conn: &TenantConnection, id: i64) -> Result<()> {
    conn.with_connection(move |c| {
        if c.execute("DELETE FROM products WHERE id = ?1", [id])? == 0 {
            return Err(not_found(id));
        }
        Ok(())
    })
    .await
}

pub async fn count(conn: &TenantConnection) -> Result<i64> {
    conn.with_connection(|c| Ok(c.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?))
        .await
}

/// Products whose name contains `needle` (case-sensitive substring).
pub async fn search_by_name(conn: &TenantConnection, needle: &str) -> Result<Vec<Product>> {
    let needle = needle.to_string();
    conn.with_connection(move |c| {
        let mut stmt = c.prepare(&format!(
            "SELECT {} FROM products WHERE instr(name, ?1) > 0 ORDER BY id",
            PRODUCT_COLUMNS
        ))?;
        let rows = stmt.query_map([&needle], product_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}
