//! Server configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tgm_core::TdOptions;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path the configuration was loaded from
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Address the HTTP server listens on
    pub bind: String,
    /// Account database path
    pub database_path: PathBuf,
    /// Bridge executable wrapping the protocol client library
    pub bridge_command: PathBuf,
    pub bridge_args: Vec<String>,
    /// Origin allowed by CORS
    pub cors_origin: String,
    /// Protocol client options
    pub td: TdOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_base_dir(&default_base_dir())
    }
}

impl Config {
    /// Defaults rooted at `base`
    fn with_base_dir(base: &Path) -> Self {
        Self {
            config_path: base.join("config.toml"),
            bind: "127.0.0.1:5000".to_string(),
            database_path: base.join("tgm.db"),
            bridge_command: PathBuf::from("tdjson-bridge"),
            bridge_args: Vec::new(),
            cors_origin: "http://localhost:3000".to_string(),
            td: TdOptions {
                directory: base.join("td"),
                ..TdOptions::default()
            },
        }
    }

    /// Load configuration from file or defaults
    ///
    /// Standard directory structure:
    /// ```text
    /// ~/.tgm/
    /// ├── config.toml           # Main configuration
    /// ├── tgm.db                # Account database
    /// └── td/                   # Client working directories
    ///     ├── <phone number>/
    ///     └── <connection id>/
    /// ```
    ///
    /// `TGM_DIR` relocates the base directory. `TGM_API_ID` and `TGM_API_HASH`
    /// override the file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = default_base_dir();
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base.join("config.toml"));

        let mut config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
                path: config_path.clone(),
                source,
            })?;
            Self::parse(&raw, &base).map_err(|source| ConfigError::Parse {
                path: config_path.clone(),
                source,
            })?
        } else {
            Self::with_base_dir(&base)
        };
        config.config_path = config_path;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a configuration file; omitted fields take defaults rooted at `base`
    fn parse(raw: &str, base: &Path) -> Result<Self, toml::de::Error> {
        let defaults = Self::with_base_dir(base);
        let mut config: Config = toml::from_str(raw)?;
        let table: toml::Table = toml::from_str(raw)?;

        // Relative defaults must follow the base directory, not the process cwd
        if !table.contains_key("database_path") {
            config.database_path = defaults.database_path;
        }
        let td_has_directory = table
            .get("td")
            .and_then(toml::Value::as_table)
            .is_some_and(|td| td.contains_key("directory"));
        if !td_has_directory {
            config.td.directory = defaults.td.directory;
        }
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = var("TGM_API_ID") {
            self.td.api_id = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "TGM_API_ID",
                value: value.clone(),
            })?;
        }
        if let Some(value) = var("TGM_API_HASH") {
            self.td.api_hash = value;
        }
        Ok(())
    }
}

fn default_base_dir() -> PathBuf {
    std::env::var("TGM_DIR").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tgm")
    })
}
