mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use joinery_config::loader::DATABASE_PATH_ENV;
use joinery_config::{ConfigLoader, default_config_dir};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "joinery", version, about = "Apply and inspect joinery schema migrations")]
struct Cli {
    /// Directory holding config.yml / config.toml
    #[arg(long, global = true, env = "JOINERY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply all pending migrations
    Migrate {
        /// SQLite database file (defaults to database.path from config)
        #[arg(long)]
        database: Option<PathBuf>,

        /// Run bodies and ledger writes without a wrapping transaction
        #[arg(long)]
        no_transaction: bool,
    },
    /// Show applied and pending migrations
    Status {
        #[arg(long)]
        database: Option<PathBuf>,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// List the migration catalog in declared order
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_dir = cli.config_dir.unwrap_or_else(default_config_dir);
    let loader = ConfigLoader::new(&config_dir);
    let config = loader.load()?;

    // The subscriber's level comes from the config, so loading has to happen
    // first. Its outcome is logged here once there is somewhere to log to.
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    logging::init(level, cli.log_json || config.logging.json);
    log_config_source(&loader);

    match cli.command {
        Command::Migrate {
            database,
            no_transaction,
        } => commands::migrate(&config, database, no_transaction),
        Command::Status { database, json } => commands::status(&config, database, json),
        Command::List => commands::list(),
    }
}

fn config_source(loader: &ConfigLoader) -> String {
    match loader.config_path() {
        Some(path) => format!("loaded config from {}", path.display()),
        None => format!(
            "no config file in {}, using defaults",
            loader.config_dir().display()
        ),
    }
}

fn log_config_source(loader: &ConfigLoader) {
    match loader.config_path() {
        Some(_) => info!("{}", config_source(loader)),
        None => debug!("{}", config_source(loader)),
    }
    if std::env::var_os(DATABASE_PATH_ENV).is_some_and(|v| !v.is_empty()) {
        debug!("{DATABASE_PATH_ENV} overrides database.path");
    }
}
