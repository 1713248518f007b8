pub mod env;
pub mod generate;
pub mod parse;
pub mod types;

use std::path::{Path, PathBuf};

pub use env::{expand_env_refs, UnsetEnvVars};
pub use parse::{load_config, parse_config_str, ConfigError};
pub use types::Config;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/sdc/config.yml";

/// `~/.config/sdc/config.yml`, if a home directory is known
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/sdc/config.yml"))
}

/// Default config locations, most specific first.
pub fn config_search_paths() -> Vec<PathBuf> {
    user_config_path()
        .into_iter()
        .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG_PATH)))
        .collect()
}

/// `--config` wins outright (tilde expanded, existence checked on load);
/// otherwise the first default location that exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(expand_tilde(path)),
        None => config_search_paths().into_iter().find(|path| path.exists()),
    }
}

/// Resolve a leading `~` component against the home directory.
///
/// `~user/...` is not supported and comes back unchanged, as does every path
/// when no home directory is known.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) if rest.as_os_str().is_empty() => home,
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
