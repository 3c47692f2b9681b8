//! LanceDB connection and housekeeping helpers.
//!
//! Provides database open functions, an ensure-table helper, and the startup
//! dimension check that keeps one embedding dimension per collection.

use arrow_array::RecordBatchIterator;
use lancedb::{connect, Connection};
use std::sync::Arc;
use tracing::info;

use stash_core::error::{Error, Result};

use crate::schema::vector_dim;

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(Error::backend)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(Error::backend)?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::backend)?;
    info!(table = name, "created vector table");
    Ok(())
}

/// Fail with `DimensionMismatch` when an existing table stores vectors of another size.
///
/// A missing table passes: it will be created with `expected` on first write.
pub async fn check_dimension(conn: &Connection, name: &str, expected: usize) -> Result<()> {
    if !table_exists(conn, name).await? {
        return Ok(());
    }
    let table = conn.open_table(name).execute().await.map_err(Error::backend)?;
    let schema = table.schema().await.map_err(Error::backend)?;
    match vector_dim(&schema) {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(Error::DimensionMismatch { expected: actual, actual: expected }),
        None => Err(Error::InvalidConfig(format!("table '{name}' has no fixed-size vector column"))),
    }
}
