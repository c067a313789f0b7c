//! Configuration module for the p2pjson server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// How the server reaches its remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// stdin/stdout of this process (spawned as a subprocess)
    #[default]
    Stdio,
    /// TCP listener; every connection is its own peer
    Tcp,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "p2pjson")]
#[command(author = "p2pjson authors")]
#[command(version = "0.1.0")]
#[command(about = "Serve the P2PJSON protocol over stdio or TCP", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Transport to serve on
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportMode>,

    /// Address to bind to in tcp mode (e.g., 127.0.0.1:7420)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum concurrent connections in tcp mode
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum accepted message body in bytes
    #[arg(short = 'b', long)]
    pub max_body_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport-related configuration
#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,
    /// Address to bind to in tcp mode
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent connections in tcp mode
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            listen: default_listen(),
            max_connections: default_max_connections(),
        }
    }
}

/// Framing limits
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Maximum accepted message body in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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
    "127.0.0.1:7420".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_body_size() -> usize {
    p2pjson::codec::DEFAULT_MAX_BODY_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportMode,
    pub listen: String,
    pub max_connections: usize,
    pub max_body_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            transport: cli.transport.unwrap_or(toml_config.transport.mode),
            listen: cli.listen.unwrap_or(toml_config.transport.listen),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.transport.max_connections),
            max_body_size: cli
                .max_body_size
                .unwrap_or(toml_config.protocol.max_body_size),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    pub fn limits(&self) -> p2pjson::Limits {
        p2pjson::Limits {
            max_body_size: self.max_body_size,
            ..Default::default()
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
