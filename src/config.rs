//! Configuration module for netspeed.
//!
//! Supports command-line arguments, a TOML configuration file and two
//! credential environment variables. Credentials come from the environment
//! when set, otherwise from the `[auth]` section. Every other setting takes
//! the CLI value over the config file value.

use crate::auth::{AuthError, Credential, CredentialTable, SignatureScheme};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Server credential list: comma-separated `clientID:hexsecret` pairs.
pub const TOKENS_ENV: &str = "NETSPEED_TOKENS";

/// Client credential: a single `clientID:hexsecret` pair.
pub const KEY_ENV: &str = "NETSPEED_KEY";

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "netspeed")]
#[command(author = "netspeed authors")]
#[command(version = "0.1.0")]
#[command(about = "Network throughput test with signed-token authentication", long_about = None)]
pub struct CliArgs {
    /// Run in server mode
    #[arg(long)]
    pub server: bool,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to listen on (server) or connect to (client)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to listen on or connect to (1..=65535)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Transfer timeout in seconds (the client waits twice as long)
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Maximum concurrent clients (server mode)
    #[arg(long = "clients")]
    pub max_clients: Option<usize>,

    /// Print progress dots (client mode)
    #[arg(long)]
    pub dot: bool,

    /// Token signature scheme
    #[arg(long, value_enum)]
    pub signature: Option<SignatureScheme>,

    /// Shorthand for `--log-level debug`
    #[arg(long)]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Transfer timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// How often the accept loop wakes up, in seconds
    #[serde(default = "default_accept_timeout_secs")]
    pub accept_timeout_secs: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            max_clients: default_max_clients(),
            accept_timeout_secs: default_accept_timeout_secs(),
        }
    }
}

/// Credential configuration
#[derive(Debug, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub signature: SignatureScheme,
    /// Server credential table, `clientID:hexsecret` each
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Client credential, `clientID:hexsecret`
    pub key: Option<String>,
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

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    28082
}

fn default_timeout_secs() -> f64 {
    3.0
}

fn default_max_clients() -> usize {
    1
}

fn default_accept_timeout_secs() -> f64 {
    2.0
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values read from the environment.
#[derive(Debug, Default)]
pub struct EnvOverrides {
    pub tokens: Option<String>,
    pub key: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            tokens: read(TOKENS_ENV),
            key: read(KEY_ENV),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_mode: bool,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub max_clients: usize,
    pub accept_timeout: Duration,
    pub dot: bool,
    pub signature: SignatureScheme,
    pub tokens: Vec<Credential>,
    pub key: Option<Credential>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_mode: false,
            host: default_host(),
            port: default_port(),
            timeout: Duration::from_secs_f64(default_timeout_secs()),
            max_clients: default_max_clients(),
            accept_timeout: Duration::from_secs_f64(default_accept_timeout_secs()),
            dot: false,
            signature: SignatureScheme::default(),
            tokens: Vec::new(),
            key: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args, environment and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config, EnvOverrides::from_env())
    }

    /// Merge the three sources and validate the result.
    pub fn merge(
        cli: CliArgs,
        toml_config: TomlConfig,
        env: EnvOverrides,
    ) -> Result<Self, ConfigError> {
        let timeout_secs = cli.timeout.unwrap_or(toml_config.server.timeout_secs);
        let accept_timeout_secs = toml_config.server.accept_timeout_secs;

        let tokens = match env.tokens {
            Some(list) => Credential::parse_list(&list)?,
            None => toml_config
                .auth
                .tokens
                .iter()
                .map(|pair| Credential::parse(pair))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let key = env
            .key
            .or(toml_config.auth.key)
            .map(|pair| Credential::parse(&pair))
            .transpose()?;

        let config = Config {
            server_mode: cli.server,
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            timeout: positive_duration("timeout", timeout_secs)?,
            max_clients: cli.max_clients.unwrap_or(toml_config.server.max_clients),
            accept_timeout: positive_duration("accept_timeout_secs", accept_timeout_secs)?,
            dot: cli.dot,
            signature: cli.signature.unwrap_or(toml_config.auth.signature),
            tokens,
            key,
            log_level: if cli.debug {
                "debug".to_string()
            } else if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be in range 1..=65535".into()));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max clients must be at least 1".into()));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        Ok(())
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The server credential table; refuses to run unauthenticated.
    pub fn credential_table(&self) -> Result<CredentialTable, ConfigError> {
        if self.tokens.is_empty() {
            return Err(ConfigError::AuthRequired(TOKENS_ENV));
        }
        Ok(CredentialTable::from_credentials(
            self.tokens.iter().cloned(),
            self.signature,
        ))
    }

    /// The client's own credential.
    pub fn client_key(&self) -> Result<Credential, ConfigError> {
        self.key.clone().ok_or(ConfigError::AuthRequired(KEY_ENV))
    }
}

fn positive_duration(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{name} must be a positive number of seconds, got {secs}"
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("auth required: set {0} or the [auth] section")]
    AuthRequired(&'static str),

    #[error(transparent)]
    Credentials(#[from] AuthError),
}
