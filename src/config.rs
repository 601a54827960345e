//! Configuration for the OSC engine daemon
//!
//! Loads configuration from a TOML file with the handful of parameters
//! the daemon needs: where to listen, which concurrency strategy to run,
//! reply prefixes, and the outbound target table.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default listen port, matching the original tooling around this protocol
pub const DEFAULT_PORT: u16 = 2222;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

/// Server concurrency strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Single-threaded: a held bundle blocks the whole server
    Blocking,
    /// One worker thread per inbound packet
    Threading,
    /// One child process per inbound packet (unix only)
    Forking,
    /// TCP streaming with one thread per connection
    Streaming,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address
    ///
    /// Examples:
    /// - `0.0.0.0:2222` - all interfaces
    /// - `127.0.0.1:2222` - localhost only
    pub bind_address: String,

    /// Concurrency strategy (blocking, threading, forking, streaming)
    pub mode: ServerMode,

    /// Address handler-error replies are sent under; empty disables them
    pub error_prefix: String,

    /// Address informational replies are sent under
    pub info_prefix: String,

    /// Send replies to this port on the source host instead of the
    /// source's own port
    pub return_port: Option<u16>,
}

/// Outbound fan-out configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target spec strings: `host[:port][/prefix] [+/pat] [-/pat] ...`
    pub targets: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Built-in defaults: threaded server on all interfaces, port 2222,
    /// conventional reply prefixes, no outbound targets
    pub fn builtin_defaults() -> Self {
        Self {
            server: ServerConfig {
                bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
                mode: ServerMode::Threading,
                error_prefix: "/error".to_string(),
                info_prefix: "/serverinfo".to_string(),
                return_port: None,
            },
            client: ClientConfig {
                targets: Vec::new(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::builtin_defaults()
    }
}
