use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<String>,
    pub database_url: Option<String>,
    pub database_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub jwt_secret: Option<String>,
    pub token_ttl_minutes: Option<i64>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}
