pub mod config;
pub mod plan;
pub mod run;
pub mod state;

use crate::config::{config_search_paths, load_config, ConfigError};
use crate::context::RunContext;
use std::path::PathBuf;
use tracing::info;

/// Load config, install logging from it, and build the run context.
pub fn load_context(config_path: Option<PathBuf>) -> Result<RunContext, ConfigError> {
    let config_path = config_path.ok_or_else(|| {
        let searched: String = config_search_paths()
            .iter()
            .map(|path| format!("  {}\n", path.display()))
            .collect();
        ConfigError::Validation(format!(
            "config not found\nSearched locations:\n{}\n\
             Use --config <path> to specify a config file, or run 'sdc config init' to generate one.",
            searched
        ))
    })?;

    let config = load_config(&config_path)?;
    crate::logging::init(
        &config.general.log_level,
        config.general.log_file_path.as_deref(),
    )?;
    info!(config_path = %config_path.display(), pipeline = %config.pipeline, "Loaded configuration");

    RunContext::from_config(config)
}
