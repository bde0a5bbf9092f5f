//! Server configuration loaded from a TOML file.
//!
//! The configuration is dynamically reloadable: every reload cycle
//! re-reads the file given on the command line. Only the initial load
//! is fatal on failure; a mid-run re-read failure keeps the previous
//! configuration in force and counts as a reload warning.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// Dynamically reloadable server configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Log level applied on every reload: fatal, warn, info, debug or trace.
    pub loglevel: String,
    /// Ordered list of directories holding `*.json` cluster files.
    /// Later directories win on cluster-name collisions.
    pub cluster_dirs: Vec<PathBuf>,
    /// Dynamic resource registry settings.
    pub registry: RegistryConfig,
    /// Metrics sink settings.
    pub metrics: MetricsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
            cluster_dirs: vec![PathBuf::from("clusters")],
            registry: RegistryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Dynamic registry connection settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Whether the dynamic registry source is consulted at all.
    pub enabled: bool,
    /// Base address of the registry HTTP API.
    pub address: String,
    /// Long-poll wait bound in seconds. Also bounds how long a
    /// superseded watcher can linger before it notices cancellation.
    pub wait_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "http://127.0.0.1:8500".to_string(),
            wait_secs: 10,
        }
    }
}

/// Metrics sink settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// statsd `host:port`; unset or empty disables metrics entirely.
    pub host: Option<String>,
    /// Counter name prefix.
    pub prefix: String,
    /// Flush interval for the buffered sink; zero selects the direct
    /// (send-per-increment) sink.
    pub flush_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: None,
            prefix: "ranged".to_string(),
            flush_interval_ms: 0,
        }
    }
}

/// Load the startup configuration.
///
/// An explicitly named file that cannot be read or parsed is fatal;
/// no file at all means defaults.
pub fn load(path: Option<&Path>) -> Result<ServerConfig> {
    match path {
        Some(path) => load_file(path),
        None => {
            info!("no config file in arguments, using default config");
            Ok(ServerConfig::default())
        }
    }
}

/// Read and parse one configuration file.
pub fn load_file(path: &Path) -> Result<ServerConfig> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::config(format!(
            "could not read config file {}: {err}",
            path.display()
        ))
    })?;
    Ok(toml::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.loglevel, "info");
        assert_eq!(config.cluster_dirs, vec![PathBuf::from("clusters")]);
        assert!(!config.registry.enabled);
        assert!(config.metrics.host.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            loglevel = "debug"
            cluster_dirs = ["base", "overrides"]

            [registry]
            enabled = true
            address = "http://registry.internal:8500"
            wait_secs = 30

            [metrics]
            host = "statsd.internal:8125"
            prefix = "ranged.prod"
            flush_interval_ms = 2000
        "#;
        let config: ServerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.loglevel, "debug");
        assert_eq!(
            config.cluster_dirs,
            vec![PathBuf::from("base"), PathBuf::from("overrides")]
        );
        assert!(config.registry.enabled);
        assert_eq!(config.registry.wait_secs, 30);
        assert_eq!(config.metrics.host.as_deref(), Some("statsd.internal:8125"));
        assert_eq!(config.metrics.flush_interval_ms, 2000);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: ServerConfig = toml::from_str("loglevel = \"warn\"").unwrap();
        assert_eq!(config.loglevel, "warn");
        assert_eq!(config.cluster_dirs, vec![PathBuf::from("clusters")]);
        assert_eq!(config.registry.wait_secs, 10);
    }

    #[test]
    fn test_named_missing_file_is_fatal() {
        let err = load(Some(Path::new("/nonexistent/ranged.toml"))).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_no_file_uses_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_load_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cluster_dirs = [\"topology\"]").unwrap();
        let config = load_file(file.path()).unwrap();
        assert_eq!(config.cluster_dirs, vec![PathBuf::from("topology")]);
    }
}
