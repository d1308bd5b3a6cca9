//! Launcher configuration
//!
//! Stores the install location, branch, and build server in
//! ~/.config/branchsync/settings.json. The engine only reads these values;
//! the CLI is the one writer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::manifest::BranchEndpoint;

const DEFAULT_BRANCH: &str = "release";

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

/// Persisted launcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Game installation directory
    #[serde(default)]
    pub install_root: PathBuf,

    /// Game executable, absolute or relative to the install root
    #[serde(default)]
    pub exe_path: Option<PathBuf>,

    /// Branch to verify and patch against
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Host part of `https://builds.<host>`
    #[serde(default)]
    pub build_host: String,

    /// Full build server URL, overriding `build_host` (mirrors)
    #[serde(default)]
    pub build_base_url: Option<String>,

    /// Descriptor used for fresh installs
    #[serde(default)]
    pub descriptor_url: Option<String>,

    /// Hashing threads during verification (None = one per core)
    #[serde(default)]
    pub verify_threads: Option<usize>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            install_root: PathBuf::new(),
            exe_path: None,
            branch: default_branch(),
            build_host: String::new(),
            build_base_url: None,
            descriptor_url: None,
            verify_threads: None,
        }
    }
}

impl LauncherConfig {
    /// Get the config directory path (~/.config/branchsync)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("branchsync");

        Ok(config_dir)
    }

    /// Get the default settings file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from the default location, or return defaults
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Could not load settings: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load settings from the default location, failing on unreadable files
    pub fn try_load() -> Result<Self> {
        Self::try_load_from(&Self::default_path()?)
    }

    /// Load settings from `path`; a missing file yields defaults
    pub fn try_load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(config)
    }

    /// Save settings to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.install_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingInstallRoot);
        }

        if self.branch.trim().is_empty() {
            return Err(ConfigError::MissingBranch);
        }

        self.endpoint().map(|_| ())
    }

    /// Build server for this configuration
    pub fn endpoint(&self) -> Result<BranchEndpoint, ConfigError> {
        match &self.build_base_url {
            Some(url) if !url.trim().is_empty() => Ok(BranchEndpoint::with_base_url(url.trim())),
            _ if !self.build_host.trim().is_empty() => Ok(BranchEndpoint::for_host(self.build_host.trim())),
            _ => Err(ConfigError::MissingBuildHost),
        }
    }

    /// Game executable resolved against the install root
    pub fn resolved_exe_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.exe_path {
            Some(exe) if exe.is_absolute() => Ok(exe.clone()),
            Some(exe) => Ok(self.install_root.join(exe)),
            None => Err(ConfigError::MissingExePath),
        }
    }

    /// Set a setting by name, as used by `config set`
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let optional = |v: &str| {
            if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            }
        };

        match key {
            "install_root" => self.install_root = PathBuf::from(value),
            "exe_path" => self.exe_path = optional(value).map(PathBuf::from),
            "branch" => self.branch = value.to_string(),
            "build_host" => self.build_host = value.to_string(),
            "build_base_url" => self.build_base_url = optional(value),
            "descriptor_url" => self.descriptor_url = optional(value),
            "verify_threads" => {
                self.verify_threads = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?)
                }
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Install root is not configured")]
    MissingInstallRoot,

    #[error("Branch is not configured")]
    MissingBranch,

    #[error("Build host is not configured (set build_host or build_base_url)")]
    MissingBuildHost,

    #[error("Game executable is not configured")]
    MissingExePath,

    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
