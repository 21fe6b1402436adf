//! Shopping carts, one line per (user, product).

use serde::Deserialize;
use storefront_tenancy_core::{now_timestamp, CartItem, Result, TenancyError};
use storefront_tenancy_storage::TenantConnection;

#[derive(Debug, Clone, Deserialize)]
pub struct AddToCart {
    pub product_id: i64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

/// Cart lines of one user, joined with their products.
pub async fn list_for_user(conn: &TenantConnection, user_id: i64) -> Result<Vec<CartItem>> {
    conn.with_connection(move |c| {
        let mut stmt = c.prepare(
            "SELECT c.id, c.product_id, p.name, p.price_cents, c.quantity
             FROM carts c JOIN products p ON p.id = c.product_id
             WHERE c.user_id = ?1
             ORDER BY c.id",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok(CartItem {
                id: row.get(0)?,
                product_id: row.get(1)?,
                product_name: row.get(2)?,
                price_cents: row.get(3)?,
                quantity: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Add a product to the cart, incrementing an existing line.
///
/// Returns the cart line id.
pub async fn add_item(conn: &TenantConnection, user_id: i64, item: AddToCart) -> Result<i64> {
    if item.quantity < 1 {
        return Err(TenancyError::invalid("quantity", "quantity must be at least 1"));
    }

    conn.with_transaction(move |tx| {
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM products WHERE id = ?1)",
            [item.product_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(TenancyError::invalid("product_id", "the selected product is invalid"));
        }

        let now = now_timestamp();
        Ok(tx.query_row(
            "INSERT INTO carts (user_id, product_id, quantity, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (user_id, product_id)
             DO UPDATE SET quantity = quantity + excluded.quantity, updated_at = excluded.updated_at
             RETURNING id",
            rusqlite::params![user_id, item.product_id, item.quantity, now],
            |row| row.get(0),
        )?)
    })
    .await
}

/// Remove a cart line owned by `user_id`. Returns false if no such line.
pub async fn remove_item(conn: &TenantConnection, user_id: i64, cart_id: i64) -> Result<bool> {
    conn.with_connection(move |c| {
        let removed = c.execute(
            "DELETE FROM carts WHERE id = ?1 AND user_id = ?2",
            [cart_id, user_id],
        )?;
        Ok(removed > 0)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::products::{self, NewProduct};
    use crate::repository::users::{self, NewCustomer};
    use crate::repository::testing::tenant_db;

    async fn seed(conn: &TenantConnection, email: &str) -> (i64, i64) {
        let user = users::create_customer(
            conn,
            NewCustomer {
                name: "Shopper".to_string(),
                email: email.to_string(),
                password: "password123".to_string(),
                password_confirmation: "password123".to_string(),
            },
            4,
        )
        .await
        .unwrap();
        let product = products::create(
            conn,
            NewProduct {
                name: "Mug".to_string(),
                description: None,
                price_cents: 1200,
                stock: 3,
                image: None,
            },
        )
        .await
        .unwrap();
        (user.id, product.id)
    }

    #[tokio::test]
    async fn test_add_increments_existing_line() {
        let db = tenant_db("alpha").await;
        let (user_id, product_id) = seed(&db.conn, "a@example.com").await;

        let first = add_item(&db.conn, user_id, AddToCart { product_id, quantity: 1 })
            .await
            .unwrap();
        let second = add_item(&db.conn, user_id, AddToCart { product_id, quantity: 2 })
            .await
            .unwrap();
        assert_eq!(first, second);

        let items = list_for_user(&db.conn, user_id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);
        assert_eq!(items[0].product_name, "Mug");
        assert_eq!(items[0].price_cents, 1200);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_input() {
        let db = tenant_db("alpha").await;
        let (user_id, product_id) = seed(&db.conn, "a@example.com").await;

        let err = add_item(&db.conn, user_id, AddToCart { product_id, quantity: 0 })
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("quantity"));

        let err = add_item(&db.conn, user_id, AddToCart { product_id: 999, quantity: 1 })
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("product_id"));
    }

    #[tokio::test]
    async fn test_remove_scoped_to_owner() {
        let db = tenant_db("alpha").await;
        let (owner_id, product_id) = seed(&db.conn, "a@example.com").await;
        let other = users::create_customer(
            &db.conn,
            NewCustomer {
                name: "Other".to_string(),
                email: "b@example.com".to_string(),
                password: "password123".to_string(),
                password_confirmation: "password123".to_string(),
            },
            4,
        )
        .await
        .unwrap();

        let line = add_item(&db.conn, owner_id, AddToCart { product_id, quantity: 1 })
            .await
            .unwrap();
        assert!(!remove_item(&db.conn, other.id, line).await.unwrap());
        assert!(remove_item(&db.conn, owner_id, line).await.unwrap());
        assert!(list_for_user(&db.conn, owner_id).await.unwrap().is_empty());
    }
}
