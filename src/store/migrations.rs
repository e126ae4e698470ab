//! Version-tracked migrations for the libSQL state backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::StateError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "processed_messages",
    sql: r#"
        CREATE TABLE IF NOT EXISTS processed_messages (
            id TEXT PRIMARY KEY,
            processed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_processed_messages_processed_at
            ON processed_messages(processed_at);
    "#,
}];

/// Map a libSQL error, treating "not a database" as corruption.
pub(crate) fn state_error(location: &str, context: &str, e: libsql::Error) -> StateError {
    let message = e.to_string();
    if message.contains("not a database") || message.contains("malformed") {
        StateError::Corrupt {
            location: location.to_string(),
            reason: message,
        }
    } else {
        StateError::Database(format!("{context}: {message}"))
    }
}

/// Apply all pending migrations.
pub async fn run_migrations(conn: &Connection, location: &str) -> Result<(), StateError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| state_error(location, "Failed to create _migrations table", e))?;

    let current_version = get_current_version(conn, location).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                state_error(
                    location,
                    &format!("Migration V{} ({}) failed", migration.version, migration.name),
                    e,
                )
            })?;
            seed_version(conn, location, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection, location: &str) -> Result<i64, StateError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| state_error(location, "Failed to query migration version", e))?;

    let row = rows
        .next()
        .await
        .map_err(|e| state_error(location, "Failed to read migration version", e))?;

    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| state_error(location, "Failed to parse migration version", e)),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(
    conn: &Connection,
    location: &str,
    version: i64,
    name: &str,
) -> Result<(), StateError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| state_error(location, &format!("Failed to record migration V{version}"), e))?;
    Ok(())
}
