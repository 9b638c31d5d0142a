//! Configuration for the echo server and client.
//!
//! The server takes command-line arguments and an optional TOML file;
//! CLI arguments take precedence over config file values.
//! The client is configured from the command line only.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::protocols::echo::{DEFAULT_BUFFER_SIZE, DEFAULT_PAYLOAD_SIZE};

/// How the acceptor hands connections to sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Dispatch {
    /// Finish each session before accepting the next connection.
    Sequential,
    /// One task per connection.
    #[default]
    Concurrent,
}

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "halfclose-echo")]
#[command(version)]
#[command(about = "One-shot echo server with a half-close handshake", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:3333 or [::]:3333)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Receive buffer size per connection, in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Connection dispatch policy
    #[arg(short = 'd', long, value_enum)]
    pub dispatch: Option<Dispatch>,

    /// Maximum concurrent sessions (concurrent dispatch only)
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Per-operation I/O timeout in seconds (none by default)
    #[arg(long)]
    pub io_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            dispatch: Dispatch::default(),
            max_connections: default_max_connections(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    pub io_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            io_timeout_secs: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:3333".to_string()
}

fn default_backlog() -> i32 {
    64
}

fn default_max_connections() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backlog: i32,
    pub buffer_size: usize,
    pub dispatch: Dispatch,
    pub max_connections: usize,
    pub io_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI arguments with the TOML file they name, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.session.buffer_size),
            dispatch: cli.dispatch.unwrap_or(toml_config.server.dispatch),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            io_timeout: cli
                .io_timeout
                .or(toml_config.session.io_timeout_secs)
                .map(Duration::from_secs),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be non-zero"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let toml_config = TomlConfig::default();
        Config {
            listen: toml_config.server.listen,
            backlog: toml_config.server.backlog,
            buffer_size: toml_config.session.buffer_size,
            dispatch: toml_config.server.dispatch,
            max_connections: toml_config.server.max_connections,
            io_timeout: None,
            log_level: toml_config.logging.level,
        }
    }
}

/// Command-line arguments for the echo client
#[derive(Parser, Debug, Clone)]
#[command(name = "halfclose-client")]
#[command(version)]
#[command(about = "Repeatedly runs the half-close echo exchange against a server", long_about = None)]
pub struct ClientArgs {
    /// Server host name or address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Payload size in bytes (at least 1)
    #[arg(short = 's', long, default_value_t = DEFAULT_PAYLOAD_SIZE)]
    pub payload_size: NonZeroUsize,

    /// Number of exchanges to run (runs forever if omitted)
    #[arg(short = 'n', long)]
    pub iterations: Option<u64>,

    /// Pause between exchanges, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub retry_delay_ms: u64,

    /// Per-operation I/O timeout in seconds (none by default)
    #[arg(long)]
    pub io_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ClientArgs {
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout.map(Duration::from_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
