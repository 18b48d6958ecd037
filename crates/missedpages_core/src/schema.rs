//! The ledger's one-table schema, created on first use.

use std::fs;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::error::{LedgerResult, StorageContext};
use crate::runtime::ResolvedPaths;
use crate::store::{LedgerStore, TABLE_NAME};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Create the `missed_pages` table and its indexes if they are missing.
pub fn ensure_schema(connection: &Connection) -> LedgerResult<()> {
    connection
        .execute_batch(SCHEMA_SQL)
        .storage_context("failed to create missed_pages schema")
}

/// True once [`ensure_schema`] has run against this database.
pub fn schema_present(connection: &Connection) -> LedgerResult<bool> {
    connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [TABLE_NAME],
            |row| row.get(0),
        )
        .storage_context("failed to inspect sqlite_master")
}

/// Open the ledger at `paths.db_path`, creating the file, its directory and
/// the schema as needed.
pub fn open_store(paths: &ResolvedPaths) -> Result<LedgerStore> {
    if let Some(parent) = paths.db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = LedgerStore::open(&paths.db_path)
        .with_context(|| format!("failed to open ledger {}", paths.db_path.display()))?;
    ensure_schema(store.connection())?;
    Ok(store)
}
