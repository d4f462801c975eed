use std::collections::HashSet;
use std::path::Path;

use rusqlite::{Connection, Transaction};

use crate::error::AppError;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

macro_rules! migration {
    ($file:literal) => {
        Migration {
            name: $file,
            sql: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../migrations/", $file)),
        }
    };
}

/// Applied in order; names are recorded in `schema_migrations`.
const MIGRATIONS: &[Migration] = &[migration!("0001_init.sql")];

fn db_err(code: &str, message: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> AppError {
    let code = code.to_string();
    let message = message.into();
    move |e| AppError::new(code, message).with_details(e.to_string())
}

/// Open the history database, creating its directory when needed.
pub fn open(path: &Path) -> Result<Connection, AppError> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| {
            AppError::new("HISTORY_DB_OPEN_FAILED", "Cannot create history directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;
    }
    Connection::open(path).map_err(|e| {
        AppError::new("HISTORY_DB_OPEN_FAILED", "Cannot open history database")
            .with_details(format!("path={}; err={}", path.display(), e))
    })
}

pub fn open_in_memory() -> Result<Connection, AppError> {
    Connection::open_in_memory().map_err(db_err(
        "HISTORY_DB_OPEN_FAILED",
        "Cannot open in-memory history database",
    ))
}

fn applied_migrations(conn: &Connection) -> Result<HashSet<String>, AppError> {
    let mut stmt = conn
        .prepare("SELECT name FROM schema_migrations")
        .map_err(db_err("HISTORY_DB_MIGRATE_FAILED", "Cannot read schema_migrations"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<Result<HashSet<_>, _>>())
        .map_err(db_err("HISTORY_DB_MIGRATE_FAILED", "Cannot read schema_migrations"))?;
    Ok(names)
}

fn apply(tx: &Transaction<'_>, m: &Migration) -> Result<(), AppError> {
    tx.execute_batch(m.sql)
        .map_err(db_err("HISTORY_DB_MIGRATE_FAILED", format!("Migration {} failed", m.name)))?;
    tx.execute(
        "INSERT INTO schema_migrations(name, applied_at) \
         VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
        [m.name],
    )
    .map_err(db_err(
        "HISTORY_DB_MIGRATE_FAILED",
        format!("Cannot record migration {}", m.name),
    ))?;
    Ok(())
}

/// Bring the schema up to date. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
           name TEXT PRIMARY KEY NOT NULL,
           applied_at TEXT NOT NULL
         );",
    )
    .map_err(db_err("HISTORY_DB_MIGRATE_FAILED", "Cannot create schema_migrations"))?;

    let applied = applied_migrations(conn)?;
    for m in MIGRATIONS.iter().filter(|m| !applied.contains(m.name)) {
        let tx = conn
            .transaction()
            .map_err(db_err("HISTORY_DB_MIGRATE_FAILED", "Cannot begin migration"))?;
        apply(&tx, m)?;
        tx.commit()
            .map_err(db_err("HISTORY_DB_MIGRATE_FAILED", "Cannot commit migration"))?;
        tracing::info!(migration = m.name, "applied history migration");
    }
    Ok(())
}
