//! TOML-based configuration for the printer redirection client.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\rdpdr\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/rdpdr/config.toml` (or `~/.config/rdpdr`)
//! - macOS:    `~/Library/Application Support/rdpdr/config.toml`
//!
//! The same directory is the default root of the printer configuration
//! cache (`<dir>/printers/…`) and of the file backend's spool directory
//! (`<dir>/spool/…`).
//!
//! # What is TOML? (for beginners)
//!
//! TOML is a configuration file format designed to be easy to read and
//! write.  Example:
//!
//! ```toml
//! [session]
//! synchronous_channels = false
//! log_level = "debug"
//!
//! [printer]
//! name = "Office"
//! driver = "Generic PCL:file"
//! is_default = true
//!
//! [[printers]]
//! name = "Lobby"
//! driver = "Generic PostScript"
//! ```
//!
//! `serde` generates the (de)serialisation code from the struct definitions.
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent, so an empty or missing file is a
//! valid configuration.

use std::path::{Path, PathBuf};

use rdpdr_core::ChannelStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::backend::PrinterSpec;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    pub fn status_code(&self) -> ChannelStatus {
        ChannelStatus::INITIALIZATION_ERROR
    }
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub printer: PrinterConfig,
    /// Printers the backends report when enumerating.
    #[serde(default)]
    pub printers: Vec<PrinterEntry>,
}

/// Session-wide behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Process requests on the transport thread instead of a worker.
    #[serde(default)]
    pub synchronous_channels: bool,
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Location of the printer configuration cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Overrides the cache root (defaults to the config directory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// The printer to redirect and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrinterConfig {
    /// Printer to redirect.  When absent every printer is enumerated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Driver name; a `:backend` suffix selects the backend.
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub is_default: bool,
    /// Backend used when the driver name has no suffix.
    #[serde(default = "default_backend")]
    pub default_backend: String,
    /// Spool directory of the `file` backend (defaults to `<config dir>/spool`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spool_dir: Option<PathBuf>,
}

/// A printer known to the backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrinterEntry {
    pub name: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub is_default: bool,
}

impl From<&PrinterEntry> for PrinterSpec {
    fn from(entry: &PrinterEntry) -> Self {
        PrinterSpec {
            name: entry.name.clone(),
            driver: entry.driver.clone(),
            is_default: entry.is_default,
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_backend() -> String {
    "file".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            synchronous_channels: false,
            log_level: default_log_level(),
        }
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            name: None,
            driver: String::new(),
            is_default: false,
            default_backend: default_backend(),
            spool_dir: None,
        }
    }
}

impl AppConfig {
    /// Printers handed to the backends: the `[[printers]]` list plus the
    /// `[printer]` section when it names one.
    pub fn printer_specs(&self) -> Vec<PrinterSpec> {
        let mut specs: Vec<PrinterSpec> = self.printers.iter().map(PrinterSpec::from).collect();
        if let Some(name) = &self.printer.name {
            if !specs.iter().any(|s| &s.name == name) {
                let driver = self
                    .printer
                    .driver
                    .split_once(':')
                    .map_or(self.printer.driver.as_str(), |(driver, _)| driver);
                specs.push(PrinterSpec {
                    name: name.clone(),
                    driver: driver.to_string(),
                    is_default: self.printer.is_default,
                });
            }
        }
        specs
    }

    /// Root directory of the printer configuration cache.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when no override is set
    /// and the platform directory cannot be determined.
    pub fn cache_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache.root {
            Some(root) => Ok(root.clone()),
            None => config_dir(),
        }
    }

    /// Spool directory of the `file` backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when no override is set
    /// and the platform directory cannot be determined.
    pub fn spool_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.printer.spool_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_dir()?.join("spool")),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file, returning
/// `AppConfig::default()` if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning the default if it does not exist.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories.
///
/// # Errors
///
/// See [`save_config`].
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory including the `rdpdr` component.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("rdpdr"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("rdpdr"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("rdpdr")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
