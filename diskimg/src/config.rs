// SPDX-License-Identifier: GPL-3.0-only

//! TOML configuration shared by both binaries.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use diskimg_sys::ToolsConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Names a config file when `--config` is not given
pub const CONFIG_ENV: &str = "DISKIMG_CONFIG";
pub const SYSTEM_CONFIG: &str = "/etc/diskimg/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn from_toml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(path, &text)
    }

    /// Load `explicit`, else `$DISKIMG_CONFIG`, else the system file when it
    /// exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match resolve_path(explicit, std::env::var_os(CONFIG_ENV), Path::new(SYSTEM_CONFIG)) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }
}

/// An explicitly named file must exist; the system file is optional.
pub fn resolve_path(explicit: Option<&Path>, env: Option<OsString>, system: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    system.is_file().then(|| system.to_path_buf())
}
