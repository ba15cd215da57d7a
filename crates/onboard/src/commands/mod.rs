pub mod apply;
pub mod config_cmd;

use std::path::{Path, PathBuf};

use onboard_config::{Config, ConfigError, Target};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub(crate) fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(onboard_config::config_path)
}

pub(crate) fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(onboard_config::load_config_from(&config_file(global))?)
}

/// Resolve the selected profile into a gateway target.
pub(crate) fn load_target(global: &GlobalOpts) -> Result<Target, CliError> {
    let config = load_config(global)?;
    config
        .resolve(global.profile.as_deref())
        .map_err(|err| match err {
            ConfigError::UnknownProfile { profile } => {
                let mut available: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
                available.sort_unstable();
                CliError::ProfileNotFound {
                    name: profile,
                    available: available.join(", "),
                    path: config_file(global).display().to_string(),
                }
            }
            other => other.into(),
        })
}

pub(crate) fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })
}
