use serde::{Deserialize, Serialize};

use crate::configs::{CacheConfig, LoggingConfig, ServerConfig, TlsConfig};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Loads `config.toml` from the current working directory. Unlike a
    /// server that has nothing sane to fall back to, a local proxy works
    /// fine with built-in defaults, so a missing file is not an error.
    pub fn load() -> crate::common::types::AnyResult<Self> {
        match std::fs::read_to_string("config.toml") {
            Ok(raw) if !raw.trim().is_empty() => Ok(toml::from_str(&raw)?),
            _ => Ok(Config::default()),
        }
    }
}
