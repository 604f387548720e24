//! Optional TOML configuration file

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use podweave_logs::LogsConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Aggregation engine tunables
    pub logs: LogsConfig,
}

impl Config {
    /// Load the file at `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&text).context(format!("Invalid config file: {}", path.display()))
    }

    fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
