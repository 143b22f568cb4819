use std::{
    io::Write,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use blockcheck_blocklist::UnknownUserPolicy;
use blockcheck_server::{FailurePolicy, ServerOptions, protocol::MAX_FRAME_LEN};
use serde::{Deserialize, Serialize};
use tracing::{Level, level_filters::LevelFilter};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum LogLevel {
    #[serde(rename = "trace")]
    Trace,
    #[serde(rename = "debug")]
    Debug,
    #[default]
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        LevelFilter::from_level(value.into())
    }
}

/// Allow or block, used wherever a fallback answer is configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    #[default]
    Allow,
    Block,
}

impl From<Policy> for UnknownUserPolicy {
    fn from(value: Policy) -> Self {
        match value {
            Policy::Allow => UnknownUserPolicy::Allow,
            Policy::Block => UnknownUserPolicy::Block,
        }
    }
}

impl From<Policy> for FailurePolicy {
    fn from(value: Policy) -> Self {
        match value {
            Policy::Allow => FailurePolicy::Allow,
            Policy::Block => FailurePolicy::Block,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Path of the Unix socket the checker listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Permission bits for the socket file, e.g. `0o660`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_mode: Option<u32>,
    /// Read/write timeout per connection, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Largest accepted request payload, in bytes.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// Logging level for the server.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn options(&self) -> ServerOptions {
        ServerOptions {
            timeout: self.timeout(),
            max_request_size: self.max_request_size,
            socket_mode: self.socket_mode,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: None,
            timeout_secs: default_timeout_secs(),
            max_request_size: default_max_request_size(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlocklistConfig {
    /// Directory holding one blocklist file per user.
    #[serde(default = "default_blocklist_dir")]
    pub directory: PathBuf,
    /// Answer for users without a blocklist file.
    #[serde(default)]
    pub unknown_user: Policy,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            directory: default_blocklist_dir(),
            unknown_user: Policy::default(),
        }
    }
}

/// Settings of the DoH proxy that consults the checker.
///
/// The checker itself only reads `on_checker_failure` (for `blockcheck check`). The rest
/// is validated here and consumed by the proxy process sharing this file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default = "default_upstream_resolver")]
    pub upstream_resolver: SocketAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certfile: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<PathBuf>,
    /// Answer assumed when the checker is unreachable or rejects a request.
    #[serde(default)]
    pub on_checker_failure: Policy,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_proxy_port(),
            upstream_resolver: default_upstream_resolver(),
            certfile: None,
            keyfile: None,
            on_checker_failure: Policy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub blocklist: BlocklistConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.timeout_secs == 0 {
            return Err(ConfigError::Invalid("server.timeout_secs must be positive".into()));
        }
        if self.server.max_request_size == 0 || self.server.max_request_size > MAX_FRAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "server.max_request_size must be between 1 and {}",
                MAX_FRAME_LEN
            )));
        }
        if self.proxy.certfile.is_some() != self.proxy.keyfile.is_some() {
            return Err(ConfigError::Invalid(
                "proxy.certfile and proxy.keyfile must be set together".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found")]
    NotFound,
    #[error("failed to read config file: {0}")]
    Read(std::io::Error),
    #[error("{0}")]
    Decode(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn decode_from_path(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound,
        _ => ConfigError::Read(e),
    })?;
    let config: Config =
        toml::from_str(&content).map_err(|e| ConfigError::Decode(e.message().into()))?;
    Ok(config)
}

/// Load the config for the checker, writing a default one if none exists.
///
/// A file that exists but cannot be read is an error and is left untouched.
pub fn load_config(config_path: &Path) -> anyhow::Result<Config> {
    match decode_from_path(config_path) {
        Ok(cfg) => Ok(cfg),
        Err(ConfigError::NotFound) => create_default_config(config_path),
        Err(e) => Err(e.into()),
    }
}

pub fn create_default_config(path: &Path) -> anyhow::Result<Config> {
    let cfg = Config::default();

    let toml_str = toml::to_string_pretty(&cfg)?;

    // Never clobber a file that appeared after the read.
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?
        .write_all(toml_str.as_bytes())?;

    Ok(cfg)
}

fn default_socket_path() -> PathBuf {
    "/tmp/dnsblockcheck.sock".into()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_request_size() -> usize {
    blockcheck_server::protocol::DEFAULT_MAX_REQUEST_SIZE
}

fn default_log_level() -> LogLevel {
    LogLevel::default()
}

fn default_blocklist_dir() -> PathBuf {
    "./user-blocklist".into()
}

fn default_listen_address() -> String {
    "127.0.0.1".into()
}

fn default_proxy_port() -> u16 {
    8053
}

fn default_upstream_resolver() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 53))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
