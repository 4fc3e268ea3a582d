pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, default_config_dir};
pub use model::{AppConfig, DatabaseConfig, LoggingConfig, MigrationsConfig};
