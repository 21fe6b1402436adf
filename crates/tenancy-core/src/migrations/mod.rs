//! Schema migration framework for Storefront databases.
//!
//! Two independent migration sets exist:
//!
//! - [`central_migrations`]: the registry database (tenants, domains, owners,
//!   audit log)
//! - [`tenant_migrations`]: every per-tenant store database (users, products,
//!   carts)
//!
//! Migrations are forward-only, versioned, and tracked in a
//! `schema_migrations` table inside the database they were applied to. Each
//! migration runs in its own transaction, and an advisory lock row prevents
//! two processes from migrating the same file at once.
//!
//! # Usage
//!
//! ```rust,ignore
//! use storefront_tenancy_core::migrations::{run_migrations, tenant_migrations};
//!
//! let conn = rusqlite::Connection::open("tenantalpha.db")?;
//! run_migrations(&conn, &tenant_migrations())?;
//! ```

use crate::{Result, TenancyError};
use rusqlite::Connection;

mod central;
mod tenant;

/// Migration version number.
///
/// Format: MAJOR * 1_000_000 + MINOR * 1_000 + PATCH
pub type MigrationVersion = i64;

/// A schema migration.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number (must be unique and monotonically increasing)
    pub version: MigrationVersion,
    /// Human-readable description
    pub description: &'static str,
    /// SQL to execute
    pub sql: &'static str,
}

/// Registry database migrations in order.
pub fn central_migrations() -> Vec<Migration> {
    central::all()
}

/// Per-tenant database migrations in order.
pub fn tenant_migrations() -> Vec<Migration> {
    tenant::all()
}

/// Initialize the migrations tracking table with advisory lock support.
fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS migration_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            locked_at TEXT,
            locked_by TEXT
        );

        INSERT OR IGNORE INTO migration_lock (id, locked_at, locked_by) VALUES (1, NULL, NULL);
        "#,
    )?;
    Ok(())
}

/// Acquire the migration advisory lock.
/// Returns true if lock was acquired, false if another process holds it.
fn acquire_migration_lock(conn: &Connection) -> Result<bool> {
    // Locks older than five minutes are treated as abandoned
    let rows = conn.execute(
        "UPDATE migration_lock SET locked_at = datetime('now'), locked_by = 'migration'
         WHERE id = 1 AND (locked_at IS NULL OR locked_at < datetime('now', '-5 minutes'))",
        [],
    )?;
    Ok(rows > 0)
}

/// Release the migration advisory lock.
fn release_migration_lock(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE migration_lock SET locked_at = NULL, locked_by = NULL WHERE id = 1",
        [],
    )?;
    Ok(())
}

/// Get the current schema version (highest applied migration).
pub fn get_schema_version(conn: &Connection) -> Result<MigrationVersion> {
    init_migrations_table(conn)?;

    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .ok()
        .flatten();

    Ok(version.unwrap_or(0))
}

/// Check if a specific migration has been applied.
pub fn is_migration_applied(conn: &Connection, version: MigrationVersion) -> Result<bool> {
    init_migrations_table(conn)?;

    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    Ok(count > 0)
}

/// Run all pending migrations from `migrations`.
///
/// Idempotent: only migrations not yet recorded are applied. Versions must be
/// strictly increasing; an out-of-order set is rejected before anything runs.
///
/// # Returns
///
/// The number of migrations applied.
pub fn run_migrations(conn: &Connection, migrations: &[Migration]) -> Result<usize> {
    check_ordering(migrations)?;
    init_migrations_table(conn)?;

    if !acquire_migration_lock(conn)? {
        return Err(TenancyError::Other(
            "Another migration is in progress. Wait and retry.".to_string(),
        ));
    }

    let result = run_migrations_inner(conn, migrations);

    if let Err(e) = release_migration_lock(conn) {
        tracing::warn!("Failed to release migration lock: {}", e);
    }

    result
}

fn check_ordering(migrations: &[Migration]) -> Result<()> {
    for pair in migrations.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(TenancyError::Other(format!(
                "Migration versions out of order: {} follows {}",
                pair[1].version, pair[0].version
            )));
        }
    }
    Ok(())
}

/// Internal migration runner (called while holding lock).
fn run_migrations_inner(conn: &Connection, migrations: &[Migration]) -> Result<usize> {
    let mut applied_count = 0;

    for migration in migrations {
        if is_migration_applied(conn, migration.version)? {
            tracing::debug!(
                version = migration.version,
                description = migration.description,
                "Migration already applied, skipping"
            );
            continue;
        }

        tracing::debug!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );

        let tx = conn.unchecked_transaction()?;

        tx.execute_batch(migration.sql).map_err(|e| {
            TenancyError::Other(format!("Migration {} failed: {}", migration.version, e))
        })?;

        tx.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, datetime('now'))",
            rusqlite::params![migration.version, migration.description],
        )?;

        tx.commit()?;
        applied_count += 1;
    }

    Ok(applied_count)
}

/// Get list of applied migrations with their timestamps.
pub fn get_migration_history(conn: &Connection) -> Result<Vec<(MigrationVersion, String, String)>> {
    init_migrations_table(conn)?;

    let mut stmt = conn.prepare(
        "SELECT version, description, applied_at FROM schema_migrations ORDER BY version",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Check if the schema is behind the given migration set.
pub fn needs_migration(conn: &Connection, migrations: &[Migration]) -> Result<bool> {
    let current = get_schema_version(conn)?;
    let latest = migrations.last().map(|m| m.version).unwrap_or(0);
    Ok(current < latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_init_migrations_table() {
        let conn = Connection::open_in_memory().unwrap();
        init_migrations_table(&conn).unwrap();
        assert!(table_exists(&conn, "schema_migrations"));
    }

    #[test]
    fn test_get_schema_version_empty() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_run_tenant_migrations() {
        let conn = Connection::open_in_memory().unwrap();

        let count = run_migrations(&conn, &tenant_migrations()).unwrap();
        assert_eq!(count, tenant_migrations().len());

        // Second run is a no-op
        assert_eq!(run_migrations(&conn, &tenant_migrations()).unwrap(), 0);

        for table in ["users", "products", "carts"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
        assert!(!table_exists(&conn, "tenants"));
    }

    #[test]
    fn test_run_central_migrations() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, &central_migrations()).unwrap();

        for table in ["tenants", "domains", "owners", "tenant_audit_log"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
        assert!(!table_exists(&conn, "carts"));
    }

    #[test]
    fn test_migration_history() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, &tenant_migrations()).unwrap();

        let history = get_migration_history(&conn).unwrap();
        assert_eq!(history.len(), tenant_migrations().len());

        let (version, description, _) = &history[0];
        assert_eq!(*version, 1_000_000);
        assert!(description.contains("v1.0.0"));
    }

    #[test]
    fn test_needs_migration() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(needs_migration(&conn, &tenant_migrations()).unwrap());
        run_migrations(&conn, &tenant_migrations()).unwrap();
        assert!(!needs_migration(&conn, &tenant_migrations()).unwrap());
    }

    #[test]
    fn test_failed_migration_rolls_back_its_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        let migrations = vec![
            Migration {
                version: 1_000_000,
                description: "v1.0.0: ok",
                sql: "CREATE TABLE first (id INTEGER PRIMARY KEY);",
            },
            Migration {
                version: 1_001_000,
                description: "v1.1.0: broken",
                sql: "CREATE TABLE second (id INTEGER PRIMARY KEY); CREATE TABLE broken (",
            },
        ];

        let err = run_migrations(&conn, &migrations).unwrap_err();
        assert!(err.to_string().contains("1001000"));

        assert!(table_exists(&conn, "first"));
        assert!(!table_exists(&conn, "second"));
        assert_eq!(get_schema_version(&conn).unwrap(), 1_000_000);

        // Lock released even though the run failed
        assert!(acquire_migration_lock(&conn).unwrap());
    }

    #[test]
    fn test_out_of_order_set_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let mut migrations = tenant_migrations();
        migrations.reverse();
        assert!(run_migrations(&conn, &migrations).is_err());
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_advisory_lock() {
        let conn = Connection::open_in_memory().unwrap();
        init_migrations_table(&conn).unwrap();

        assert!(acquire_migration_lock(&conn).unwrap());
        assert!(!acquire_migration_lock(&conn).unwrap());

        release_migration_lock(&conn).unwrap();
        assert!(acquire_migration_lock(&conn).unwrap());
    }
}
