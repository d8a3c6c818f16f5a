//! Unified configuration for the identirust server.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (identirust.toml)
//! ```toml
//! [server]
//! listen = "0.0.0.0:3000"
//!
//! [storage]
//! data_dir = "/var/lib/identirust"
//! repair = false
//!
//! [reconcile]
//! max_attempts = 8
//! pessimistic_fallback = true
//! ```
//!
//! Environment overrides use the `IDENTIRUST_` prefix and `__` between
//! sections, e.g. `IDENTIRUST_STORAGE__DATA_DIR=/data`.

mod defaults;
mod tuning;

pub use defaults::*;
pub use tuning::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Main configuration for identirust.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentirustConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Contact storage configuration
    pub storage: StorageConfig,
    /// Reconciliation retry behaviour
    pub reconcile: ReconcileConfig,
}

impl IdentirustConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(IdentirustConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with IDENTIRUST_ prefix
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

/// Contact storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// RocksDB directory; contacts live only in memory when unset
    pub data_dir: Option<PathBuf>,
    /// Run RocksDB repair before opening
    pub repair: bool,
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Attempts per identify call before giving up
    pub max_attempts: usize,
    /// Run the final attempt under the exclusive lock
    pub pessimistic_fallback: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pessimistic_fallback: DEFAULT_PESSIMISTIC_FALLBACK,
        }
    }
}

impl ReconcileConfig {
    pub fn to_tuning(&self) -> ReconcileTuning {
        ReconcileTuning {
            max_attempts: self.max_attempts.max(1),
            pessimistic_fallback: self.pessimistic_fallback,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<bool>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT)
}

/// Listen address for a bare port such as the `PORT` environment variable.
pub fn listen_addr_for_port(port: &str) -> Result<SocketAddr, ConfigError> {
    let port: u16 = port.trim().parse().map_err(|e| ConfigError {
        message: format!("invalid port {port:?}: {e}"),
    })?;
    Ok(SocketAddr::new(DEFAULT_LISTEN_HOST, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = IdentirustConfig::default();
        assert_eq!(config.server.listen.to_string(), "0.0.0.0:3000");
        assert_eq!(config.server.listen.port(), DEFAULT_LISTEN_PORT);
        assert!(config.storage.data_dir.is_none());
        assert!(!config.storage.repair);
        assert_eq!(config.reconcile.to_tuning(), ReconcileTuning::default());
    }

    #[test]
    fn test_file_then_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nlisten = \"127.0.0.1:4000\"\n\n[storage]\ndata_dir = \"/tmp/from-file\"\n\n[reconcile]\nmax_attempts = 3"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = IdentirustConfig::from_env(Some(&path)).unwrap();
        assert_eq!(config.server.listen.port(), 4000);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/from-file")));
        assert_eq!(config.reconcile.max_attempts, 3);
        assert!(config.reconcile.pessimistic_fallback);

        let overrides = ConfigOverrides {
            server: Some(ServerOverrides {
                listen: Some("127.0.0.1:5000".parse().unwrap()),
            }),
            storage: Some(StorageOverrides {
                data_dir: None,
                repair: Some(true),
            }),
        };
        let config = IdentirustConfig::load(Some(&path), overrides).unwrap();
        assert_eq!(config.server.listen.port(), 5000);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/from-file")));
        assert!(config.storage.repair);
    }

    #[test]
    fn test_listen_addr_for_port() {
        assert_eq!(
            listen_addr_for_port("8080").unwrap(),
            SocketAddr::new(DEFAULT_LISTEN_HOST, 8080)
        );
        assert!(listen_addr_for_port("not-a-port").is_err());
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let config = ReconcileConfig {
            max_attempts: 0,
            pessimistic_fallback: false,
        };
        assert_eq!(config.to_tuning().max_attempts, 1);
    }
}
