use std::path::{Path, PathBuf};

use joinery_common::{Error, Result};

use crate::model::AppConfig;

/// Environment variable overriding `database.path`.
pub const DATABASE_PATH_ENV: &str = "JOINERY_DATABASE_PATH";

const CANDIDATES: &[&str] = &["config.yml", "config.yaml", "config.toml"];

/// `~/.joinery`, falling back to the working directory when there is no home.
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".joinery")
}

/// Locates and parses the config file inside a config directory.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// First existing config file in the directory, if any.
    pub fn config_path(&self) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|name| self.config_dir.join(name))
            .find(|p| p.is_file())
    }

    /// Load the config file (or defaults when none exists), then apply
    /// environment overrides and resolve the database path.
    ///
    /// Runs before logging is set up, so it reports nothing itself.
    pub fn load(&self) -> Result<AppConfig> {
        let mut config = match self.config_path() {
            Some(path) => load_file(&path)?,
            None => AppConfig::default(),
        };

        if let Ok(path) = std::env::var(DATABASE_PATH_ENV)
            && !path.is_empty()
        {
            config.database.path = Some(PathBuf::from(path));
        }

        if config.database.path.is_none() {
            config.database.path = Some(self.config_dir.join("data").join("joinery.db"));
        }

        Ok(config)
    }
}

/// Parse a single config file, dispatching on its extension.
pub fn load_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}
