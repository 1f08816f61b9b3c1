//! Configuration System
//!
//! Layered configuration built with the `config` crate. Sources, lowest
//! precedence first: built-in defaults, `<root>/config/config.toml`,
//! `<root>/config/<QUERY_ROUTER_ENV>.toml`, then `QUERY_ROUTER__SECTION__KEY`
//! environment variables.

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

mod merge;
mod sources;

/// Variable selecting the environment-specific config file
pub const ENV_SELECTOR: &str = "QUERY_ROUTER_ENV";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Reference engine defaults
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults applied by `MemoryEngine` when a call leaves them unset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Age in milliseconds after which cached data is refetched.
    /// Unset means fresh until invalidated.
    #[serde(default)]
    pub stale_time_ms: Option<u64>,

    /// Extra attempts after a failed fetch
    #[serde(default)]
    pub retry: u32,
}

impl EngineConfig {
    pub fn stale_time(&self) -> Option<Duration> {
        self.stale_time_ms.map(Duration::from_millis)
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.stale_time_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "engine.stale_time_ms must be greater than zero; omit it to keep data fresh until invalidated"
                    .to_string(),
            ));
        }
        self.logging.validate()
    }
}

/// Loads `RouterConfig` from files and the environment
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load for a project rooted at `root`, reading the process environment.
    pub fn load(root: &Path) -> Result<RouterConfig, ConfigError> {
        Self::load_with_env(root, std::env::vars().collect())
    }

    /// Load for `root` with an explicit set of environment variables.
    pub fn load_with_env(
        root: &Path,
        vars: HashMap<String, String>,
    ) -> Result<RouterConfig, ConfigError> {
        let env_name = vars
            .get(ENV_SELECTOR)
            .cloned()
            .unwrap_or_else(|| "development".to_string());

        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::workspace_file::add_to_builder(builder, root, &env_name)?;
        let builder = sources::environment::add_to_builder(builder, vars);
        Self::finish(builder)
    }

    /// Load a single file over the defaults. No environment overrides.
    pub fn load_from_file(path: &Path) -> Result<RouterConfig, ConfigError> {
        let builder = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path).required(true));
        Self::finish(builder)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<RouterConfig, ConfigError> {
        let config: RouterConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        debug!(
            retry = config.engine.retry,
            stale_time_ms = ?config.engine.stale_time_ms,
            log_level = %config.logging.level,
            "Configuration loaded"
        );
        Ok(config)
    }
}
