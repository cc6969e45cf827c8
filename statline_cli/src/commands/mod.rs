pub mod pipe;
pub mod serve;
pub mod validate;

use anyhow::Result;
use statline_core::{parse_config_from_file, Config};
use std::path::PathBuf;

/// Loads the config file, or the defaults when none is given.
pub async fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => parse_config_from_file(&path).await,
        None => Ok(Config::default()),
    }
}
