use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_bind_address() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { common::DEFAULT_GATEWAY_PORT }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            workers: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Route used when a proxied request names no `path`.
    #[serde(default = "default_route")]
    pub default_route: String,
    #[serde(default = "default_key_update_route")]
    pub key_update_route: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String { common::DEFAULT_UPSTREAM_URL.to_string() }
fn default_route() -> String { common::DEFAULT_PROXY_ROUTE.to_string() }
fn default_key_update_route() -> String { common::KEY_UPDATE_ROUTE.to_string() }
fn default_timeout_ms() -> u64 { common::DEFAULT_REQUEST_TIMEOUT_MS }

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_route: default_route(),
            key_update_route: default_key_update_route(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub output: Option<PathBuf>,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: GatewayConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: GatewayConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }

    /// Merge with another config, preferring values from other
    pub fn merge(&mut self, other: GatewayConfig) {
        self.server.bind_address = other.server.bind_address;
        self.server.port = other.server.port;
        if other.server.workers.is_some() {
            self.server.workers = other.server.workers;
        }

        self.upstream = other.upstream;

        self.logging.level = other.logging.level;
        if other.logging.output.is_some() {
            self.logging.output = other.logging.output;
        }
    }

    /// `MEDRAG_UPSTREAM_URL` and `MEDRAG_GATEWAY_LOG` win over files.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("MEDRAG_UPSTREAM_URL") {
            self.upstream.base_url = url;
        }
        if let Ok(path) = std::env::var("MEDRAG_GATEWAY_LOG") {
            self.logging.output = Some(PathBuf::from(path));
        }
    }
}
