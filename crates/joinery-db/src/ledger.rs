use chrono::{DateTime, NaiveDateTime, Utc};
use joinery_common::{Error, Result};
use rusqlite::{Connection, ErrorCode, params};
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_TABLE: &str = "schema_migrations";

/// One row of the ledger: a migration that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub sequence_id: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Durable record of applied migrations, stored in a single table.
///
/// Every method takes the connection it should run against so the runner can
/// hand in a transaction and have the ledger write commit or roll back
/// together with the migration body.
#[derive(Debug, Clone)]
pub struct MigrationLedger {
    table: String,
}

impl Default for MigrationLedger {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl MigrationLedger {
    /// Use `table` as the ledger. The name is interpolated into SQL, so only
    /// plain identifiers are accepted.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(Error::Config(format!(
                "invalid ledger table name {table:?}: expected [A-Za-z_][A-Za-z0-9_]*"
            )));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it does not exist yet.
    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS [{table}] (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
            table = self.table
        );
        conn.execute_batch(&sql)
            .map_err(|e| Error::LedgerUnavailable(format!("failed to create {}: {e}", self.table)))
    }

    /// Whether the ledger table has been created. Performs no writes.
    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            params![self.table],
            |row| row.get(0),
        )
        .map_err(|e| Error::LedgerUnavailable(format!("failed to inspect schema: {e}")))
    }

    /// All recorded migrations in the order they were applied.
    pub fn list_applied(&self, conn: &Connection) -> Result<Vec<MigrationRecord>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, name, applied_at FROM [{}] ORDER BY id ASC",
                self.table
            ))
            .map_err(|e| Error::LedgerUnavailable(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::LedgerUnavailable(format!("failed to query ledger: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let (sequence_id, name, applied_at) = row
                .map_err(|e| Error::LedgerUnavailable(format!("failed to read ledger row: {e}")))?;
            let applied_at = parse_datetime(&applied_at).ok_or_else(|| {
                Error::LedgerUnavailable(format!(
                    "unreadable applied_at {applied_at:?} for migration {name}"
                ))
            })?;
            records.push(MigrationRecord {
                sequence_id,
                name,
                applied_at,
            });
        }
        Ok(records)
    }

    pub fn applied_names(&self, conn: &Connection) -> Result<Vec<String>> {
        Ok(self
            .list_applied(conn)?
            .into_iter()
            .map(|r| r.name)
            .collect())
    }

    /// Insert the ledger row for `name` and return its sequence id.
    ///
    /// A name that is already present yields [`Error::DuplicateName`]; any
    /// other storage failure is [`Error::LedgerUnavailable`].
    pub fn record_applied(&self, conn: &Connection, name: &str) -> Result<i64> {
        conn.execute(
            &format!("INSERT INTO [{}] (name) VALUES (?1)", self.table),
            params![name],
        )
        .map_err(|e| {
            if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
                Error::DuplicateName(name.to_string())
            } else {
                Error::LedgerUnavailable(format!("failed to record {name}: {e}"))
            }
        })?;

        let sequence_id = conn.last_insert_rowid();
        debug!("recorded {name} as ledger entry {sequence_id}");
        Ok(sequence_id)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // SQLite datetime('now') produces "YYYY-MM-DD HH:MM:SS"
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .ok()
        })
}
