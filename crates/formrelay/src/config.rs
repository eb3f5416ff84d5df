//! Configuration management for formrelay.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults. The
//! resulting [`Config`] is handed to each component at startup; nothing reads
//! hosts or ports from globals.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "formrelay";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "messages.db";

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FORMRELAY_`, sections split by `__`)
/// 2. TOML config file at `~/.config/formrelay/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP intake configuration.
    pub http: HttpConfig,
    /// Datagram relay configuration.
    pub relay: RelayConfig,
    /// Document store configuration.
    pub store: StoreConfig,
}

/// HTTP intake configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Address the HTTP server binds to.
    pub host: IpAddr,
    /// Port the HTTP server listens on.
    pub port: u16,
    /// Directory static files are served from.
    pub static_root: PathBuf,
    /// Largest accepted submission body in bytes.
    pub max_body_bytes: usize,
}

/// Datagram relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the relay listener binds to and intake sends to.
    pub host: IpAddr,
    /// Relay port.
    pub port: u16,
    /// Receive buffer size. Longer datagrams are truncated to this length.
    pub chunk_size: usize,
}

/// Document store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `SQLite` URI of the store.
    /// Defaults to `file:~/.local/share/formrelay/messages.db`
    pub uri: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            static_root: PathBuf::from("."),
            max_body_bytes: 64 * 1024,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 5000,
            chunk_size: 1024,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("FORMRELAY_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.http.port == 0 {
            return Err(Error::config_validation(
                "http.port must be greater than 0",
            ));
        }

        if self.http.max_body_bytes == 0 {
            return Err(Error::config_validation(
                "http.max_body_bytes must be greater than 0",
            ));
        }

        if self.relay.port == 0 {
            return Err(Error::config_validation(
                "relay.port must be greater than 0",
            ));
        }

        if self.relay.chunk_size == 0 || self.relay.chunk_size > MAX_DATAGRAM_PAYLOAD {
            return Err(Error::config_validation(format!(
                "relay.chunk_size ({}) must be between 1 and {MAX_DATAGRAM_PAYLOAD}",
                self.relay.chunk_size
            )));
        }

        if let Some(uri) = &self.store.uri {
            if uri.trim().is_empty() {
                return Err(Error::config_validation("store.uri cannot be empty"));
            }
        }

        Ok(())
    }

    /// Socket address the HTTP server binds to.
    #[must_use]
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    /// Socket address of the relay listener.
    #[must_use]
    pub fn relay_addr(&self) -> SocketAddr {
        SocketAddr::new(self.relay.host, self.relay.port)
    }

    /// Get the store URI, resolving defaults if not set.
    #[must_use]
    pub fn store_uri(&self) -> String {
        self.store.uri.clone().unwrap_or_else(|| {
            format!(
                "file:{}",
                Self::default_data_dir().join(DATABASE_FILE_NAME).display()
            )
        })
    }
}
