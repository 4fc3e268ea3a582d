use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use joinery_common::{Error, Result};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::ledger::MigrationLedger;
use crate::migrations::{Catalog, Migration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Run each body and its ledger insert in a single transaction, so a
    /// failed ledger write also undoes the body. Bodies that must manage
    /// their own transactions (or toggle `PRAGMA foreign_keys`) need this off.
    pub transactional: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            transactional: true,
        }
    }
}

/// Outcome of a successful [`MigrationRunner::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Migrations applied by this invocation, in the order they ran.
    pub applied: Vec<String>,
    /// Catalog entries skipped because the ledger already had them.
    pub skipped: usize,
}

impl RunReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Applied {
        sequence_id: i64,
        applied_at: DateTime<Utc>,
    },
    /// Recorded in the ledger but no longer declared in the catalog.
    Orphaned {
        sequence_id: i64,
        applied_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

/// Applies a [`Catalog`] against a database, recording progress in a
/// [`MigrationLedger`].
///
/// The runner owns no connection. Callers open one, hand it to [`run`], and
/// keep it afterwards.
///
/// [`run`]: MigrationRunner::run
pub struct MigrationRunner {
    catalog: Catalog,
    ledger: MigrationLedger,
    options: RunnerOptions,
}

impl MigrationRunner {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            ledger: MigrationLedger::default(),
            options: RunnerOptions::default(),
        }
    }

    pub fn with_ledger(mut self, ledger: MigrationLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    /// Apply every pending migration in catalog order, stopping at the first
    /// failure. Migrations applied before the failure stay applied.
    pub fn run(&self, conn: &mut Connection) -> Result<RunReport> {
        self.ledger.ensure(conn)?;
        let applied_names = self.ledger.applied_names(conn)?;

        for name in &applied_names {
            if !self.catalog.contains(name) {
                warn!("ledger records {name}, which is not in the catalog");
            }
        }

        let applied: HashSet<&str> = applied_names.iter().map(String::as_str).collect();
        let pending = self.catalog.pending(&applied);
        let mut report = RunReport {
            applied: Vec::with_capacity(pending.len()),
            skipped: self.catalog.len() - pending.len(),
        };

        if pending.is_empty() {
            info!(
                "schema is up to date ({} migrations applied)",
                applied_names.len()
            );
            return Ok(report);
        }

        info!(
            "{} pending migrations ({} already applied, last: {})",
            pending.len(),
            report.skipped,
            applied_names.last().map(String::as_str).unwrap_or("none")
        );

        for migration in pending {
            self.apply(conn, migration)?;
            report.applied.push(migration.name().to_string());
        }

        info!("applied {} migrations", report.applied.len());
        Ok(report)
    }

    fn apply(&self, conn: &mut Connection, migration: &Migration) -> Result<()> {
        let name = migration.name();
        let started = Instant::now();
        info!("applying {name}");

        if self.options.transactional {
            self.apply_in_transaction(conn, migration)?;
        } else {
            self.apply_unwrapped(conn, migration)?;
        }

        debug!("{name} finished in {:?}", started.elapsed());
        Ok(())
    }

    fn apply_in_transaction(&self, conn: &mut Connection, migration: &Migration) -> Result<()> {
        let name = migration.name();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| {
                Error::Database(format!("failed to begin transaction for {name}: {e}"))
            })?;

        // Dropping `tx` on any early return rolls the body back.
        migration.body().apply(&tx).map_err(|e| {
            error!("{name} failed, rolled back: {e}");
            Error::Migration {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;

        // A body that ran COMMIT or END has already committed its work; writing
        // the ledger row now would autocommit it outside any transaction.
        if tx.is_autocommit() {
            error!("{name} ended the wrapping transaction; its changes were committed unrecorded");
            return Err(Error::Migration {
                name: name.to_string(),
                reason: "body ended the wrapping transaction; run with transactional = false"
                    .to_string(),
            });
        }

        self.ledger.record_applied(&tx, name).map_err(|e| {
            error!("{name} could not be recorded, rolled back: {e}");
            match e {
                Error::DuplicateName(_) => e,
                other => Error::Migration {
                    name: name.to_string(),
                    reason: format!("ledger write failed: {other}"),
                },
            }
        })?;

        tx.commit().map_err(|e| {
            error!("{name} failed to commit: {e}");
            Error::Migration {
                name: name.to_string(),
                reason: format!("commit failed: {e}"),
            }
        })
    }

    fn apply_unwrapped(&self, conn: &Connection, migration: &Migration) -> Result<()> {
        let name = migration.name();

        migration.body().apply(conn).map_err(|e| {
            error!("{name} failed: {e}");
            Error::Migration {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;

        self.ledger.record_applied(conn, name).map(|_| ()).map_err(|e| {
            error!(
                "{name} ran but was NOT recorded in {}; the schema holds changes the ledger does not know about: {e}",
                self.ledger.table()
            );
            match e {
                Error::DuplicateName(_) => e,
                other => Error::PartialApplication {
                    name: name.to_string(),
                    reason: other.to_string(),
                },
            }
        })
    }

    /// Applied/pending state of every catalog entry, followed by any ledger
    /// rows the catalog no longer declares. Read-only: a database without a
    /// ledger reports everything pending and is left untouched.
    pub fn status(&self, conn: &Connection) -> Result<Vec<MigrationStatus>> {
        let records = if self.ledger.exists(conn)? {
            self.ledger.list_applied(conn)?
        } else {
            Vec::new()
        };

        let mut statuses: Vec<MigrationStatus> = self
            .catalog
            .names()
            .map(|name| {
                let state = records
                    .iter()
                    .find(|r| r.name == name)
                    .map(|r| MigrationState::Applied {
                        sequence_id: r.sequence_id,
                        applied_at: r.applied_at,
                    })
                    .unwrap_or(MigrationState::Pending);
                MigrationStatus {
                    name: name.to_string(),
                    state,
                }
            })
            .collect();

        statuses.extend(
            records
                .into_iter()
                .filter(|r| !self.catalog.contains(&r.name))
                .map(|r| MigrationStatus {
                    name: r.name,
                    state: MigrationState::Orphaned {
                        sequence_id: r.sequence_id,
                        applied_at: r.applied_at,
                    },
                }),
        );

        Ok(statuses)
    }
}
