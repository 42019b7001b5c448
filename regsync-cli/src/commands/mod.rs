//! CLI command implementations.

pub mod check;
pub mod register;
pub mod watch;

use crate::error::CliResult;
use regsync_config::{EnvLoader, RegisterCenterConfig};
use std::path::Path;

/// Load a `.env` file into the process environment, when one was given
pub fn load_env_file(env_file: Option<&str>) -> CliResult<()> {
    if let Some(env_file) = env_file {
        EnvLoader::load_dotenv(Some(env_file))?;
    }
    Ok(())
}

/// Load the config file, then apply `REGSYNC_*` overrides
pub fn load_config(config: Option<&Path>) -> CliResult<RegisterCenterConfig> {
    Ok(RegisterCenterConfig::load(config)?)
}
