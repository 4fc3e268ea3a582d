use std::path::Path;
use std::time::Duration;

use joinery_common::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::info;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;";

/// Open (creating if needed) the catalog database at `db_path`.
pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    info!("opening catalog database at {}", db_path.display());
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    conn.execute_batch(PRAGMAS)
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

    Ok(conn)
}

/// Open an existing catalog database without creating or altering anything.
pub fn open_read_only(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if !db_path.exists() {
        return Err(Error::Database(format!(
            "database {} does not exist",
            db_path.display()
        )));
    }

    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::Database(format!("failed to open database read-only: {e}")))?;

    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;

    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

    conn.execute_batch(PRAGMAS)
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

    Ok(conn)
}
