//! Configuration management for the listener sharing coordinator.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`PORTSHARE__` prefix)
//! - Component-wise validation
mod coordinator;
mod listener;
mod permission;
mod serve;
pub use coordinator::*;
pub use listener::*;
pub use permission::*;
pub use serve::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_ENV_PREFIX;
use crate::Result;

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct PortShareConfig {
    /// Socket options applied when creating listening resources
    #[serde(default)]
    pub listener: ListenerConfig,
    /// Request and event channel sizing
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Bind allow-list
    #[serde(default)]
    pub permission: PermissionConfig,
    /// Settings of the bundled demo server
    #[serde(default)]
    pub serve: ServeConfig,
}

impl Debug for PortShareConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PortShareConfig")
            .field("listener", &self.listener)
            .field("coordinator", &self.coordinator)
            .field("permission_enabled", &self.permission.enabled)
            .field("permission_rules", &self.permission.allow.len())
            .field("serve", &self.serve)
            .finish()
    }
}

impl PortShareConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `PORTSHARE__` prefix (highest priority)
    ///
    /// # Note
    /// This method does NOT validate the configuration. Callers MUST call `validate()`
    /// before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("PORTSHARE__SERVE__PORT", "9000");
    /// let cfg = PortShareConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        self.listener.validate()?;
        self.coordinator.validate()?;
        self.permission.validate()?;
        self.serve.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(CONFIG_ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("permission.allow")
}
