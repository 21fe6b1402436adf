//! Registry database migrations.
//!
//! The registry holds one row per tenant, the hostname → tenant mapping,
//! central owner accounts, and the tenant lifecycle audit log. It never holds
//! store data.

use super::Migration;

pub(super) fn all() -> Vec<Migration> {
    vec![
        Migration {
            version: 1_000_000,
            description: "v1.0.0: Tenants and domains",
            sql: V1_0_0,
        },
        Migration {
            version: 1_001_000,
            description: "v1.1.0: Central owner accounts",
            sql: V1_1_0,
        },
        Migration {
            version: 1_002_000,
            description: "v1.2.0: Tenant audit log",
            sql: V1_2_0,
        },
    ]
}

// The tenants primary key and the domains UNIQUE constraint are the only
// duplicate detection the registry relies on.
const V1_0_0: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY NOT NULL,
    store_name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tenants_created_at ON tenants(created_at);

CREATE TABLE IF NOT EXISTS domains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL UNIQUE,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE ON UPDATE CASCADE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_domains_tenant_id ON domains(tenant_id);
"#;

const V1_1_0: &str = r#"
CREATE TABLE IF NOT EXISTS owners (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

const V1_2_0: &str = r#"
CREATE TABLE IF NOT EXISTS tenant_audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    action TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    actor TEXT NOT NULL,
    details TEXT
);

CREATE INDEX IF NOT EXISTS idx_tenant_audit_log_tenant ON tenant_audit_log(tenant_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use rusqlite::Connection;

    #[test]
    fn test_versions_increase() {
        let versions: Vec<i64> = all().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1_000_000, 1_001_000, 1_002_000]);
    }

    #[test]
    fn test_domain_cascade_on_tenant_delete() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn, &all()).unwrap();

        conn.execute(
            "INSERT INTO tenants (id, store_name, created_at) VALUES ('alpha', 'Alpha', 'now')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO domains (domain, tenant_id, created_at) VALUES ('alpha.localhost', 'alpha', 'now')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM tenants WHERE id = 'alpha'", [])
            .unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM domains", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
