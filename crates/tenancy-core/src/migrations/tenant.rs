//! Per-tenant store database migrations.
//!
//! Every tenant database receives the identical schema. User emails are
//! unique inside one tenant database only.

use super::Migration;

pub(super) fn all() -> Vec<Migration> {
    vec![
        Migration {
            version: 1_000_000,
            description: "v1.0.0: Users",
            sql: V1_0_0,
        },
        Migration {
            version: 1_001_000,
            description: "v1.1.0: Products",
            sql: V1_1_0,
        },
        Migration {
            version: 1_002_000,
            description: "v1.2.0: Carts",
            sql: V1_2_0,
        },
    ]
}

const V1_0_0: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'customer' CHECK (role IN ('admin', 'customer')),
    created_at TEXT NOT NULL
);
"#;

const V1_1_0: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
    stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
    image TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_created_at ON products(created_at);
"#;

const V1_2_0: &str = r#"
CREATE TABLE IF NOT EXISTS carts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 1),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (user_id, product_id)
);
"#;
