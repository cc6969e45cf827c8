use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;

/// Encodings a config file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "toml" => Some(ConfigFormat::Toml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_name)
    }

    fn decode<T: DeserializeOwned>(self, content: &str) -> Result<T> {
        let decoded = match self {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Ok(decoded)
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Json => "JSON",
        })
    }
}

/// Loads and validates a config file. The format follows the extension.
pub async fn parse_config_from_file(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path).ok_or_else(|| {
        anyhow!(
            "{}: unsupported config format, use .yaml, .yml, .toml or .json",
            path.display()
        )
    })?;

    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    load(&contents, format).with_context(|| format!("loading {}", path.display()))
}

pub fn parse_config_from_str(content: &str, format: &str) -> Result<Config> {
    let format =
        ConfigFormat::from_name(format).ok_or_else(|| anyhow!("Unsupported format: {}", format))?;
    load(content, format)
}

/// A blank document means "all defaults"; the decoders disagree on whether
/// an empty input is a valid empty map, so it never reaches them.
fn load(content: &str, format: ConfigFormat) -> Result<Config> {
    let config: Config = if content.trim().is_empty() {
        Config::default()
    } else {
        format
            .decode(content)
            .with_context(|| format!("malformed {} config", format))?
    };

    config
        .validate()
        .map_err(|e| anyhow!("invalid config: {}", e))?;
    Ok(config)
}
