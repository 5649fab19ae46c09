use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port to bind the server to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether to bind to all interfaces (0.0.0.0) or just localhost
    #[serde(default = "default_bind_all")]
    pub bind_all: bool,

    /// Output directory of the tracker backend
    #[serde(default = "default_data_directory")]
    pub data_directory: String,

    /// URL prefix for published files (e.g., "data" -> /data/snapshot.json)
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,

    /// Enable CORS for cross-origin requests
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

fn default_port() -> u16 {
    3030
}

fn default_bind_all() -> bool {
    true
}

fn default_data_directory() -> String {
    "data".to_string()
}

fn default_url_prefix() -> String {
    "data".to_string()
}

fn default_enable_cors() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_all: default_bind_all(),
            data_directory: default_data_directory(),
            url_prefix: default_url_prefix(),
            enable_cors: default_enable_cors(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file; a missing file yields the defaults
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !std::path::Path::new(path).exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

        if config.url_prefix.trim_matches('/').is_empty() {
            anyhow::bail!("url_prefix must not be empty");
        }
        Ok(config)
    }
}
