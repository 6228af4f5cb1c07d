// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration file for comet-guard.
//!
//! Pretty JSON at `~/.comet-guard/config.json`. A missing file means
//! defaults; missing fields fall back to their defaults too.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::security::{MonitorConfig, PwnedConfig, RateLimitConfig};

/// Name of the per-user directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".comet-guard";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub session: MonitorConfig,
    pub rate_limit: RateLimitConfig,
    pub pwned: PwnedConfig,

    /// Where the member store lives; defaults to the config directory.
    pub data_dir: Option<PathBuf>,
}

impl GuardConfig {
    /// Directory holding the member store.
    pub fn resolved_data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => get_config_dir(),
        }
    }
}

/// `~/.comet-guard`, without creating it.
pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Default config file path.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(get_config_dir()?.join("config.json"))
}

/// Load from the default path.
pub fn load_config() -> Result<GuardConfig, ConfigError> {
    load_config_from(&config_path()?)
}

/// Load from `path`; a missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<GuardConfig, ConfigError> {
    if !path.exists() {
        return Ok(GuardConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save to `path`, creating parent directories.
pub fn save_config(config: &GuardConfig, path: &Path) -> Result<(), ConfigError> {
    let io_err = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let content = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(io_err)?;

    tracing::info!("CONFIG_SAVED | path={}", path.display());
    Ok(())
}
