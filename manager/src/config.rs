//! Console configuration loading and parsing

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "portproxy.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "PORTPROXY_CONFIG";

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which mirror backend applies rules to the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MirrorBackend {
    Netsh,
    DryRun,
}

#[derive(Debug, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_backend")]
    pub backend: MirrorBackend,
    #[serde(default = "default_netsh_binary")]
    pub netsh_binary: PathBuf,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            netsh_binary: default_netsh_binary(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value functions
fn default_listen() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 2233)) }
fn default_db_path() -> PathBuf { PathBuf::from("./rules.db") }
fn default_netsh_binary() -> PathBuf { PathBuf::from("netsh") }
fn default_log_level() -> String { "info".into() }

fn default_backend() -> MirrorBackend {
    if cfg!(windows) {
        MirrorBackend::Netsh
    } else {
        MirrorBackend::DryRun
    }
}

impl ConsoleConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse console config")
    }

    /// Read a config file; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }
}

/// Config file location: $PORTPROXY_CONFIG, or ./portproxy.toml
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
