//! Configuration loading
//!
//! Values are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`TSFIX_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: a warning is logged and defaults are
//! used. A TOML file that exists but cannot be parsed is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "TSFIX_CONFIG";

/// Full configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub fixer: FixerConfig,
    pub harness: HarnessConfig,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[fixer]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FixerConfig {
    pub dry_run: bool,
    /// Log every evidence line at info level instead of debug
    pub verbose_evidence: bool,
    /// Worker threads for per-file processing (None = one per CPU)
    pub workers: Option<usize>,
    /// Bytes of dataset head handed to the detector
    pub sample_head_bytes: usize,
    /// Bytes of pixel-data value handed to the detector
    pub sample_pixel_bytes: usize,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            verbose_evidence: false,
            workers: None,
            sample_head_bytes: 512,
            sample_pixel_bytes: 4096,
        }
    }
}

/// `[harness]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Maximum archives to process (0 = all)
    pub archive_limit: usize,
    pub report_directory: Option<PathBuf>,
    pub work_directory: Option<PathBuf>,
    /// Page listing downloadable reference archives
    pub index_url: String,
    /// Archives fetched concurrently
    pub concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            archive_limit: 5,
            report_directory: None,
            work_directory: None,
            index_url: "https://www.rubomedical.com/dicom_files/".to_string(),
            concurrency: 4,
            fetch_timeout_secs: 60,
            fetch_retries: 3,
        }
    }
}

impl HarnessConfig {
    /// Report directory, defaulting under the platform cache directory
    pub fn resolved_report_directory(&self) -> PathBuf {
        self.report_directory
            .clone()
            .unwrap_or_else(|| default_cache_dir().join("report"))
    }

    /// Download/extract directory, defaulting under the platform cache directory
    pub fn resolved_work_directory(&self) -> PathBuf {
        self.work_directory
            .clone()
            .unwrap_or_else(|| default_cache_dir().join("archives"))
    }
}

/// Platform cache directory for harness downloads and reports
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("tsfix"))
        .unwrap_or_else(|| PathBuf::from("./tsfix_cache"))
}

/// Default configuration file path for the platform
///
/// `~/.config/tsfix/config.toml` on Linux, the platform config directory elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tsfix").join("config.toml"))
}

/// Resolve which config file to read
///
/// Priority: explicit path (command line), `TSFIX_CONFIG`, platform default.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    default_config_path()
}

/// Load a TOML config file
///
/// Returns defaults (with a warning) when the file does not exist.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file not found: {} (using compiled defaults)",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load configuration from the resolved path, or defaults if there is none
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => load_toml_config(&path),
        None => Ok(TomlConfig::default()),
    }
}

/// Resolve a boolean flag: command line > environment > config value
///
/// Environment values `1`, `true`, `yes`, `on` (any case) enable the flag;
/// `0`, `false`, `no`, `off` disable it; anything else is ignored.
pub fn resolve_flag(cli_flag: bool, env_var_name: &str, config_value: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(value) = std::env::var(env_var_name) {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => return true,
            "0" | "false" | "no" | "off" => return false,
            other => warn!("Ignoring {}={:?}: not a boolean", env_var_name, other),
        }
    }
    config_value
}

/// Resolve a directory: command line > environment > config value > default
pub fn resolve_directory(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_value: Option<&Path>,
    default: impl FnOnce() -> PathBuf,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Some(path) = config_value {
        return path.to_path_buf();
    }
    default()
}
