//! Configuration loading and resolution
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (applied through [`SettingsOverrides`])
//! 2. Environment variables (`KABU_*`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! A missing TOML file never stops the program: a warning is logged and the
//! compiled defaults are used. A TOML file that exists but cannot be parsed
//! is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_TIMEOUT: &str = "KABU_TIMEOUT";
pub const ENV_IR_TIMEOUT: &str = "KABU_IR_TIMEOUT";
pub const ENV_MAX_WORKERS: &str = "KABU_MAX_WORKERS";
pub const ENV_CACHE_DIR: &str = "KABU_CACHE_DIR";
pub const ENV_CACHE_TTL_DAYS: &str = "KABU_CACHE_TTL_DAYS";
pub const ENV_SOURCES: &str = "KABU_SOURCES";
pub const ENV_CODE_PATTERN: &str = "KABU_CODE_PATTERN";
pub const ENV_LOG_LEVEL: &str = "KABU_LOG_LEVEL";

/// Browser-like User-Agent (Chrome 131 on Windows 11)
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Default stock code rule: four characters of digits or uppercase letters
pub const DEFAULT_CODE_PATTERN: &str = "^[0-9A-Z]{4}$";

/// Earnings news page, `{code}` is substituted
pub const DEFAULT_HISTORY_URL: &str = "https://kabutan.jp/stock/news?code={code}&nmode=2";

const APP_DIR: &str = "kabu-calendar";

/// Runtime settings for a calendar run
///
/// Every field has a built-in default, so a TOML file only needs to list
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP timeout for calendar sources and history (seconds)
    pub timeout_secs: u64,
    /// HTTP timeout for IR pages (seconds)
    pub ir_timeout_secs: u64,
    /// Worker bound for every parallel stage
    pub max_workers: usize,
    /// Directory holding the IR page cache
    pub cache_dir: PathBuf,
    /// IR cache entry lifetime (days)
    pub cache_ttl_days: u32,
    pub user_agent: String,
    /// Regex every stock code must match
    pub code_pattern: String,
    /// History page template (`{code}` placeholder)
    pub history_url: String,
    /// Number of past announcements considered by inference
    pub history_limit: usize,
    /// Calendar sources, in canonical order
    pub sources: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            ir_timeout_secs: 30,
            max_workers: 4,
            cache_dir: default_cache_dir(),
            cache_ttl_days: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            code_pattern: DEFAULT_CODE_PATTERN.to_string(),
            history_url: DEFAULT_HISTORY_URL.to_string(),
            history_limit: 8,
            sources: default_sources(),
        }
    }
}

/// Default calendar sources in canonical order
pub fn default_sources() -> Vec<String> {
    vec!["sbi".to_string(), "matsui".to_string(), "tradersweb".to_string()]
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".kabu-calendar"))
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ir_timeout(&self) -> Duration {
        Duration::from_secs(self.ir_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.cache_ttl_days) * 24 * 60 * 60)
    }

    /// Path of the IR cache file inside `cache_dir`
    pub fn ir_cache_path(&self) -> PathBuf {
        self.cache_dir.join("ir_cache.json")
    }

    /// Reject settings no run could use
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 || self.ir_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be at least 1 second".to_string()));
        }
        if self.sources.is_empty() {
            return Err(Error::Config("at least one source is required".to_string()));
        }
        if !self.history_url.contains("{code}") {
            return Err(Error::Config(format!(
                "history_url must contain {{code}}: {}",
                self.history_url
            )));
        }
        regex::Regex::new(&self.code_pattern).map_err(|e| {
            Error::Config(format!("Invalid code_pattern '{}': {}", self.code_pattern, e))
        })?;
        Ok(())
    }

    /// Apply `KABU_*` environment variables on top of the current values
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<u64>(ENV_TIMEOUT)? {
            self.timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>(ENV_IR_TIMEOUT)? {
            self.ir_timeout_secs = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_MAX_WORKERS)? {
            self.max_workers = v;
        }
        if let Some(v) = env_parse::<u32>(ENV_CACHE_TTL_DAYS)? {
            self.cache_ttl_days = v;
        }
        if let Ok(v) = std::env::var(ENV_CACHE_DIR) {
            self.cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(ENV_CODE_PATTERN) {
            self.code_pattern = v;
        }
        if let Ok(v) = std::env::var(ENV_SOURCES) {
            self.sources = split_list(&v);
        }
        Ok(())
    }

    /// Apply command-line values, which win over everything else
    pub fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(v) = overrides.timeout_secs {
            self.timeout_secs = v;
        }
        if let Some(v) = overrides.max_workers {
            self.max_workers = v;
        }
        if let Some(v) = &overrides.cache_dir {
            self.cache_dir = v.clone();
        }
        if let Some(v) = &overrides.sources {
            self.sources = v.clone();
        }
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub timeout_secs: Option<u64>,
    pub max_workers: Option<usize>,
    pub cache_dir: Option<PathBuf>,
    pub sources: Option<Vec<String>>,
    pub log_level: Option<String>,
}

/// Configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Run settings (optional)
    #[serde(default)]
    pub settings: Settings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Platform config file location (`<config_dir>/kabu-calendar/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Load a TOML config file
///
/// A missing file yields the defaults with a warning.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(TomlConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve the effective configuration
///
/// `path` is the explicit `--config` value. Without one, the platform
/// default location is used when it exists.
pub fn resolve_config(path: Option<&Path>, overrides: &SettingsOverrides) -> Result<TomlConfig> {
    let mut config = match path {
        Some(p) => load_toml_config(p)?,
        None => match default_config_path() {
            Some(p) if p.exists() => load_toml_config(&p)?,
            _ => TomlConfig::default(),
        },
    };

    config.settings.apply_env()?;
    if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
        config.logging.level = level;
    }

    config.settings.apply_overrides(overrides);
    if let Some(level) = &overrides.log_level {
        config.logging.level = level.clone();
    }

    config.settings.validate()?;
    Ok(config)
}

/// Write a config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}='{}': {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

/// Split a comma separated list, dropping blanks
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
