use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use joinery_config::AppConfig;
use joinery_db::{
    Connection, MigrationLedger, MigrationRunner, MigrationState, MigrationStatus, RunReport,
    RunnerOptions, connection, schema,
};
use tracing::{error, info};

fn build_runner(config: &AppConfig, no_transaction: bool) -> Result<MigrationRunner> {
    let ledger = MigrationLedger::new(&config.migrations.ledger_table)?;
    let options = RunnerOptions {
        transactional: config.migrations.transactional && !no_transaction,
    };
    Ok(MigrationRunner::new(schema::catalog()?)
        .with_ledger(ledger)
        .with_options(options))
}

fn database_path(config: &AppConfig, database: Option<PathBuf>) -> Result<PathBuf> {
    database
        .or_else(|| config.database.path.clone())
        .context("no database path configured")
}

fn busy_timeout(config: &AppConfig) -> Duration {
    Duration::from_millis(config.database.busy_timeout_ms)
}

fn open_database(config: &AppConfig, database: Option<PathBuf>) -> Result<Connection> {
    let path = database_path(config, database)?;
    connection::open(&path, busy_timeout(config))
        .with_context(|| format!("failed to open {}", path.display()))
}

pub fn migrate(config: &AppConfig, database: Option<PathBuf>, no_transaction: bool) -> Result<()> {
    let runner = build_runner(config, no_transaction)?;
    let mut conn = open_database(config, database)?;
    run_and_report(&runner, &mut conn)?;
    Ok(())
}

fn run_and_report(runner: &MigrationRunner, conn: &mut Connection) -> Result<RunReport> {
    let report = runner.run(conn).map_err(|e| {
        let migration = e.migration_name().unwrap_or("-").to_string();
        error!(migration = %migration, "migration run failed: {e}");
        anyhow::Error::new(e)
    })?;

    if report.is_noop() {
        println!("Schema is up to date.");
    } else {
        for name in &report.applied {
            println!("  applied  {name}");
        }
        println!(
            "Applied {} migration(s), {} already present.",
            report.applied.len(),
            report.skipped
        );
    }
    Ok(report)
}

pub fn status(config: &AppConfig, database: Option<PathBuf>, json: bool) -> Result<()> {
    let runner = build_runner(config, false)?;
    let path = database_path(config, database)?;
    let conn = connection::open_read_only(&path, busy_timeout(config))
        .with_context(|| format!("failed to open {}", path.display()))?;
    let statuses = runner.status(&conn)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        print!("{}", render_status(&statuses));
    }

    let pending = statuses
        .iter()
        .filter(|s| s.state == MigrationState::Pending)
        .count();
    info!("{pending} pending of {}", runner.catalog().len());
    Ok(())
}

pub fn list() -> Result<()> {
    let catalog = schema::catalog()?;
    for name in catalog.names() {
        println!("{name}");
    }
    Ok(())
}

fn render_status(statuses: &[MigrationStatus]) -> String {
    let width = statuses.iter().map(|s| s.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for s in statuses {
        let line = match &s.state {
            MigrationState::Pending => format!("  pending   {:<width$}\n", s.name),
            MigrationState::Applied { applied_at, .. } => format!(
                "  applied   {:<width$}  {}\n",
                s.name,
                applied_at.format("%Y-%m-%d %H:%M:%S")
            ),
            MigrationState::Orphaned { applied_at, .. } => format!(
                "  orphaned  {:<width$}  {}  (not in catalog)\n",
                s.name,
                applied_at.format("%Y-%m-%d %H:%M:%S")
            ),
        };
        out.push_str(&line);
    }
    out
}
