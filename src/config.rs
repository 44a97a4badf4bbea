//! Configuration for the bulker dispatch service.
//!
//! Loads configuration from TOML files with environment variable substitution.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 3000
//! api_key = "${BULKER_DISPATCH_API_KEY}"
//!
//! [destination]
//! endpoint = "http://bulker:3042"
//! destination_id = "dest-1"
//! auth_token = "${BULKER_AUTH_TOKEN}"
//! data_layout = "segment-single-table"
//!
//! [transport]
//! timeout_ms = 10000
//!
//! [invocation]
//! workspace_id = "ws-1"
//! stream_id = "src-1"
//! connection_id = "conn-1"
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::dispatch::{DestinationConfig, Dispatcher, InvocationContext};
use crate::layouts::DataLayout;
use crate::transport::HttpTransport;

/// Environment variable overriding the config path
pub const CONFIG_PATH_ENV: &str = "BULKER_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/bulker.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown data layout '{0}'")]
    UnknownLayout(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BulkerConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Bulker destination; required to build a dispatcher
    #[serde(default)]
    pub destination: Option<DestinationSettings>,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Default invocation identifiers, reported in the metrics metadata
    #[serde(default)]
    pub invocation: InvocationContext,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_port() -> u16 {
    3000
}

/// `[destination]` table
#[derive(Debug, Deserialize, Clone)]
pub struct DestinationSettings {
    pub endpoint: String,

    pub destination_id: String,

    pub auth_token: String,

    /// One of "segment", "segment-single-table", "jitsu-legacy", "passthrough"
    #[serde(default = "default_data_layout")]
    pub data_layout: String,
}

fn default_data_layout() -> String {
    DataLayout::default().as_str().to_string()
}

/// Outbound HTTP settings
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10000
}

impl DestinationSettings {
    /// Resolve into a [`DestinationConfig`], parsing the layout name.
    pub fn to_destination_config(&self) -> Result<DestinationConfig, ConfigError> {
        Ok(DestinationConfig {
            endpoint: self.endpoint.clone(),
            destination_id: self.destination_id.clone(),
            auth_token: self.auth_token.clone(),
            data_layout: self.data_layout.parse()?,
        })
    }
}

impl BulkerConfig {
    /// Build a [`Dispatcher`] backed by [`HttpTransport`].
    pub fn build_dispatcher(&self) -> Result<Dispatcher, ConfigError> {
        let destination = self
            .destination
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("destination".to_string()))?
            .to_destination_config()?;

        let transport =
            HttpTransport::new().with_timeout(Duration::from_millis(self.transport.timeout_ms));

        info!(
            endpoint = %destination.endpoint,
            destination_id = %destination.destination_id,
            layout = %destination.data_layout,
            timeout_ms = self.transport.timeout_ms,
            "Dispatcher configured"
        );

        Ok(Dispatcher::new(destination, Arc::new(transport)))
    }

    /// Invocation context with the configured destination id filled in
    /// when `[invocation]` leaves it empty.
    pub fn invocation_context(&self) -> InvocationContext {
        let mut ctx = self.invocation.clone();
        if ctx.destination_id.is_empty() {
            if let Some(destination) = &self.destination {
                ctx.destination_id = destination.destination_id.clone();
            }
        }
        ctx
    }

    /// Load configuration from the default path or BULKER_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        info!(
            port = config.server.port,
            destination = config.destination.is_some(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate TOML content after env substitution.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let config: BulkerConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        let Some(destination) = &self.destination else {
            warn!("No [destination] configured, events cannot be delivered");
            return Ok(());
        };

        if destination.endpoint.contains("${") || destination.auth_token.contains("${") {
            warn!("Destination settings contain unsubstituted environment variables");
        }

        if !destination.endpoint.starts_with("http://")
            && !destination.endpoint.starts_with("https://")
        {
            return Err(ConfigError::ValidationError(
                "Destination endpoint must start with http:// or https://".to_string(),
            ));
        }

        Url::parse(&destination.endpoint).map_err(|e| {
            ConfigError::ValidationError(format!("Destination endpoint is not a valid URL: {e}"))
        })?;

        if destination.destination_id.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "destination.destination_id".to_string(),
            ));
        }

        if destination.auth_token.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "destination.auth_token".to_string(),
            ));
        }

        destination.data_layout.parse::<DataLayout>()?;

        if self.transport.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "transport.timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    })
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}
