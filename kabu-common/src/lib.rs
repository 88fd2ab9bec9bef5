//! # kabu Common Library
//!
//! Shared code for the kabu crates:
//! - Error type
//! - Configuration loading (TOML, environment, compiled defaults)
//! - Settings handle with generation tracking

pub mod config;
pub mod error;
pub mod settings_handle;

pub use config::{LoggingConfig, Settings, TomlConfig};
pub use error::{Error, Result};
pub use settings_handle::SettingsHandle;
