//! Typed TOML configuration with validation and hot reload.
//!
//! Each component declares a serde-deserialisable config struct and
//! implements [`Config`]. [`ConfigManager`] owns the live value behind an
//! `ArcSwap` so readers never block a reload.

pub mod humantime_compat;
mod manager;

pub use manager::ConfigManager;

use bfs_types::status_code::StatusCode;
use bfs_types::Status;
use serde::de::DeserializeOwned;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for Status {
    fn from(e: ConfigError) -> Self {
        Status::with_message(StatusCode::INVALID_CONFIG, e.to_string())
    }
}

/// A configuration section.
pub trait Config: DeserializeOwned + Send + Sync + 'static {
    /// Build the config from a parsed TOML tree. Missing keys fall back to the
    /// struct's serde defaults.
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
        Ok(value.clone().try_into()?)
    }

    /// Reject values that parse but cannot be used.
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Merge the fields that may change at runtime from `other` into `self`.
    fn hot_update(&mut self, _other: &Self) {}
}
