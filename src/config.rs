use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;

pub const DEFAULT_MAX_TOOL_OUTPUT_BYTES: u64 = 100_000;
pub const DEFAULT_SAFETY_MARGIN_BYTES: u64 = 2_000;
pub const DEFAULT_CLEANUP_DELAY_SECONDS: u64 = 300;
pub const DEFAULT_POOL_SIZE: usize = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub bind_addr: String,
    pub bind_port: u16,
    pub default_pool_size: usize,
    pub monitor_snapshot_path: Option<PathBuf>,
    pub chunking: ChunkingConfig,
}

/// Output budget and on-disk layout for chunked tool results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_output_bytes: u64,
    pub safety_margin_bytes: u64,
    pub cleanup_delay: Duration,
    pub base_dir: PathBuf,
}

impl ChunkingConfig {
    /// Effective per-page budget: `max_output_bytes - safety_margin_bytes`, floored at zero.
    pub fn byte_limit(&self) -> u64 {
        self.max_output_bytes
            .saturating_sub(self.safety_margin_bytes)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_TOOL_OUTPUT_BYTES,
            safety_margin_bytes: DEFAULT_SAFETY_MARGIN_BYTES,
            cleanup_delay: Duration::from_secs(DEFAULT_CLEANUP_DELAY_SECONDS),
            base_dir: default_chunk_base_dir(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_API_TOKEN is required and must not be empty")]
    MissingApiToken,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("{0} must be a non-negative integer")]
    InvalidNumber(&'static str),
    #[error("DEFAULT_POOL_SIZE must be at least 1")]
    InvalidPoolSize,
    #[error("MAX_TOOL_OUTPUT_BYTES must exceed TOOL_OUTPUT_SAFETY_MARGIN_BYTES")]
    EmptyOutputBudget,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_token = read("MCP_API_TOKEN").ok_or(ConfigError::MissingApiToken)?;
        let bind_addr = read("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = read("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let parse_u64 = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            read(key)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidNumber(key))
                })
                .transpose()
                .map(|value| value.unwrap_or(default))
        };

        let default_pool_size =
            parse_u64("DEFAULT_POOL_SIZE", DEFAULT_POOL_SIZE as u64)? as usize;
        if default_pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize);
        }

        let chunking = ChunkingConfig {
            max_output_bytes: parse_u64("MAX_TOOL_OUTPUT_BYTES", DEFAULT_MAX_TOOL_OUTPUT_BYTES)?,
            safety_margin_bytes: parse_u64(
                "TOOL_OUTPUT_SAFETY_MARGIN_BYTES",
                DEFAULT_SAFETY_MARGIN_BYTES,
            )?,
            cleanup_delay: Duration::from_secs(parse_u64(
                "CHUNK_CLEANUP_DELAY_SECONDS",
                DEFAULT_CLEANUP_DELAY_SECONDS,
            )?),
            base_dir: read("CHUNK_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_chunk_base_dir),
        };
        if chunking.byte_limit() == 0 {
            return Err(ConfigError::EmptyOutputBudget);
        }

        let config = Self {
            api_token,
            bind_addr,
            bind_port,
            default_pool_size,
            monitor_snapshot_path: read("MONITOR_SNAPSHOT_PATH").map(PathBuf::from),
            chunking,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn default_chunk_base_dir() -> PathBuf {
    env::temp_dir()
        .join(env!("CARGO_PKG_NAME"))
        .join("chunks")
}
