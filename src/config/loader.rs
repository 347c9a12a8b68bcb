// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, WatchjobError};

/// Load a configuration file from a given path and return the raw, unvalidated
/// `RawConfigFile`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] to get a
/// `ConfigFile` the rest of the crate can run.
pub fn load_raw_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        WatchjobError::Config(format!("reading config file {}: {e}", path.display()))
    })?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file from path and validate every job tree in it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw = load_raw_from_path(path)?;
    ConfigFile::try_from(raw)
}

/// Write the effective configuration back out as TOML.
pub fn save_to_path(cfg: &ConfigFile, path: impl AsRef<Path>) -> Result<()> {
    let raw = RawConfigFile::from(cfg);
    let text = toml::to_string_pretty(&raw)?;
    fs::write(path, text)?;
    Ok(())
}

/// `Watchjob.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Watchjob.toml")
}
