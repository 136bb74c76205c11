//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "BGGWEB_ROOT_FOLDER";

/// Environment variable pointing at an explicit TOML config file
pub const CONFIG_FILE_ENV: &str = "BGGWEB_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "bggweb.db";

/// Contents of the optional `config.toml`
///
/// ```toml
/// root_folder = "/srv/bggweb"
///
/// [server]
/// host = "0.0.0.0"
/// port = 8000
///
/// [pipeline]
/// batch_size = 10
/// max_failed_batches = 5
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<String>,
    #[serde(default)]
    pub server: ServerSection,
    /// Raw pipeline overrides, resolved key by key by the service
    #[serde(default)]
    pub pipeline: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from the platform config location, or defaults when no file exists
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Pipeline override for `key` rendered as a plain string
    pub fn pipeline_value(&self, key: &str) -> Option<String> {
        self.pipeline.get(key).map(|value| match value {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return PathBuf::from(path);
    }

    default_root_folder()
}

/// Path of the SQLite database inside `root`
pub fn database_path(root: &Path) -> PathBuf {
    root.join(DATABASE_FILE)
}

/// Locate the config file: explicit env override, then user config dir,
/// then `/etc/bggweb/config.toml` on Linux
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(user_config) = dirs::config_dir().map(|d| d.join("bggweb").join("config.toml")) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/bggweb/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("bggweb"))
        .unwrap_or_else(|| PathBuf::from("./bggweb_data"))
}
