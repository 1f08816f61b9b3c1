//! Environment source: QUERY_ROUTER__SECTION__KEY

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;
use std::collections::HashMap;

const PREFIX: &str = "QUERY_ROUTER";
const SEPARATOR: &str = "__";

/// Add environment overrides from `vars` to builder.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    vars: HashMap<String, String>,
) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(PREFIX)
            .prefix_separator(SEPARATOR)
            .separator(SEPARATOR)
            .try_parsing(true)
            .source(Some(vars.into_iter().collect())),
    )
}
