use config::{Config, ConfigError, File, FileFormat};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default = "default_rpc_http_url")]
    pub http_url: String,
}

fn default_rpc_http_url() -> String {
    "http://127.0.0.1:9650/ext/bc/C/rpc".to_string() // local avalanchego C-chain
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            http_url: default_rpc_http_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Contracts {
    /// Address of the canonical storage contract every name is resolved through.
    #[serde(default)]
    pub storage_address: Option<Address>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Cache {
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    300 // 5 minutes
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Logs {
    /// Maximum block span per eth_getLogs request. `None` issues unbounded queries.
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Concurrency {
    /// Ceiling on per-index fetch tasks in flight across every batch fetch.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_max_in_flight() -> usize {
    64
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub contracts: Contracts,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub logs: Logs,
    #[serde(default)]
    pub concurrency: Concurrency,
}

impl Settings {
    /// Loads `Config.toml` from the working directory (if present) and applies
    /// environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Config.toml")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;
        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from TOML text without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?;
        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("GGP_RPC_HTTP_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                self.rpc.http_url = trimmed.to_string();
            }
        }
        if let Ok(raw) = env::var("GGP_STORAGE_ADDRESS") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                let address = trimmed.parse::<Address>().map_err(|e| {
                    ConfigError::Message(format!("GGP_STORAGE_ADDRESS is not an address: {}", e))
                })?;
                self.contracts.storage_address = Some(address);
            }
        }
        if let Ok(raw) = env::var("GGP_LOG_CHUNK_SIZE") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                let size = trimmed.parse::<u64>().map_err(|e| {
                    ConfigError::Message(format!("GGP_LOG_CHUNK_SIZE is not a number: {}", e))
                })?;
                self.logs.chunk_size = Some(size);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.rpc.http_url)
            .map_err(|e| ConfigError::Message(format!("rpc.http_url is invalid: {}", e)))?;
        if self.logs.chunk_size == Some(0) {
            return Err(ConfigError::Message("logs.chunk_size must be > 0".to_string()));
        }
        if self.concurrency.max_in_flight == 0 {
            return Err(ConfigError::Message(
                "concurrency.max_in_flight must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }
}
