use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use joinery_common::{Error, Result};
use rusqlite::Connection;

/// The unit of work a migration performs. The runner treats it as opaque.
pub trait MigrationBody: Send + Sync {
    fn apply(&self, conn: &Connection) -> rusqlite::Result<()>;
}

/// A batch of SQL statements executed with `execute_batch`.
struct SqlBody(Cow<'static, str>);

impl MigrationBody for SqlBody {
    fn apply(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(&self.0)
    }
}

/// Arbitrary Rust, for backfills that need to look at the data first.
struct CodeBody<F>(F);

impl<F> MigrationBody for CodeBody<F>
where
    F: Fn(&Connection) -> rusqlite::Result<()> + Send + Sync,
{
    fn apply(&self, conn: &Connection) -> rusqlite::Result<()> {
        (self.0)(conn)
    }
}

/// A named schema or data transformation.
///
/// Names are the migration's identity in the ledger. Once a migration has
/// shipped its name and body must not change.
pub struct Migration {
    name: Cow<'static, str>,
    body: Box<dyn MigrationBody>,
}

impl Migration {
    pub fn new(name: impl Into<Cow<'static, str>>, body: impl MigrationBody + 'static) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }

    pub fn sql(name: impl Into<Cow<'static, str>>, sql: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, SqlBody(sql.into()))
    }

    pub fn code<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(&Connection) -> rusqlite::Result<()> + Send + Sync + 'static,
    {
        Self::new(name, CodeBody(f))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &dyn MigrationBody {
        self.body.as_ref()
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The ordered, immutable list of migrations known to the runner.
///
/// Order is the order of construction; nothing here sorts.
#[derive(Debug)]
pub struct Catalog {
    migrations: Vec<Migration>,
}

impl Catalog {
    pub fn new(migrations: Vec<Migration>) -> Result<Self> {
        {
            let mut seen = HashSet::with_capacity(migrations.len());
            for m in &migrations {
                if m.name().trim().is_empty() {
                    return Err(Error::Config("migration name cannot be empty".into()));
                }
                if !seen.insert(m.name()) {
                    return Err(Error::DuplicateDefinition(m.name().to_string()));
                }
            }
        }
        Ok(Self { migrations })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.migrations.iter().map(Migration::name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Declared minus applied, in declared order.
    pub fn pending<'a>(&'a self, applied: &HashSet<&str>) -> Vec<&'a Migration> {
        self.migrations
            .iter()
            .filter(|m| !applied.contains(m.name()))
            .collect()
    }
}
