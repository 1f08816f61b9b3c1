//! Project config file source: config/config.toml and config/{env}.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::Path;
use tracing::debug;

/// Add project config files to builder.
/// Precedence: config/config.toml (base) then config/{env_name}.toml.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    root: &Path,
    env_name: &str,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let config_dir = root.join("config");
    let mut builder = builder;

    for path in [
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", env_name)),
    ] {
        if path.exists() {
            debug!(config_path = %path.display(), "Adding config file");
            builder = builder.add_source(File::from(path).required(false));
        }
    }

    Ok(builder)
}
