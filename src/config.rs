//! Configuration loading and types for the storefront server.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct. Each subsection governs a different part of the
//! system: networking, table storage, blob containers, the contracts file
//! share, queues, and logging.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Table store settings.
    #[serde(default)]
    pub tables: TablesConfig,

    /// Product image container settings.
    #[serde(default)]
    pub blobs: BlobsConfig,

    /// Contracts file share settings.
    #[serde(default)]
    pub files: FilesConfig,

    /// Message queue settings.
    #[serde(default)]
    pub queues: QueuesConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum request body size in bytes (uploads included).
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Table store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TablesConfig {
    /// Backend type: `memory`, `sqlite` or `azure`.
    #[serde(default = "default_tables_backend")]
    pub backend: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// Azure Table Storage configuration.
    #[serde(default)]
    pub azure: Option<AzureTablesConfig>,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            backend: default_tables_backend(),
            sqlite: SqliteConfig::default(),
            azure: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

/// Azure Table Storage configuration. Credentials come from the
/// environment (`AZURE_STORAGE_KEY`, `AZURE_STORAGE_CONNECTION_STRING` or
/// `AZURE_STORAGE_SAS_TOKEN`), never from this file.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureTablesConfig {
    /// Storage account name.
    pub account: String,
    /// Custom endpoint (e.g. Azurite). Defaults to the account's public
    /// table endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Product image container configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobsConfig {
    /// Backend type: `local` or `memory`.
    #[serde(default = "default_blob_backend")]
    pub backend: String,

    /// Root directory for the local backend; containers are subdirectories.
    #[serde(default = "default_blob_root")]
    pub root_dir: String,

    /// Container holding product images.
    #[serde(default = "default_image_container")]
    pub container: String,

    /// Base of the public image URLs handed to clients.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Maximum total bytes for the memory backend (0 = unlimited).
    #[serde(default)]
    pub max_size_bytes: u64,
}

impl Default for BlobsConfig {
    fn default() -> Self {
        Self {
            backend: default_blob_backend(),
            root_dir: default_blob_root(),
            container: default_image_container(),
            public_base_url: default_public_base_url(),
            max_size_bytes: 0,
        }
    }
}

/// Contracts file share configuration. Shares the blob backend and root.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_share_name")]
    pub share: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            share: default_share_name(),
        }
    }
}

/// Message queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueuesConfig {
    /// How long a received order message stays hidden, in seconds.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Idle wait between empty receives, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Messages taken per receive.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Run the order worker in this process.
    #[serde(default = "default_true")]
    pub worker_enabled: bool,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout(),
            poll_interval_ms: default_poll_interval(),
            batch_size: default_batch_size(),
            worker_enabled: true,
        }
    }
}

impl QueuesConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_body_size() -> usize {
    32 * 1024 * 1024
}

fn default_tables_backend() -> String {
    "sqlite".to_string()
}

fn default_sqlite_path() -> String {
    "./data/tables.db".to_string()
}

fn default_blob_backend() -> String {
    "local".to_string()
}

fn default_blob_root() -> String {
    "./data/blobs".to_string()
}

fn default_image_container() -> String {
    "productimages".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080/api/blobs".to_string()
}

fn default_share_name() -> String {
    "contracts".to_string()
}

fn default_visibility_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.tables.backend, "sqlite");
        assert_eq!(config.blobs.container, "productimages");
        assert_eq!(config.files.share, "contracts");
        assert_eq!(config.queues.visibility_timeout(), Duration::from_secs(30));
        assert!(config.queues.worker_enabled);
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
server:
  port: 9000
tables:
  backend: azure
  azure:
    account: shopdata
blobs:
  backend: memory
  public_base_url: https://cdn.example.com
queues:
  poll_interval_ms: 250
logging:
  format: json
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        let azure = config.tables.azure.unwrap();
        assert_eq!(azure.account, "shopdata");
        assert!(azure.endpoint.is_none());
        assert_eq!(config.blobs.backend, "memory");
        assert_eq!(config.blobs.root_dir, "./data/blobs");
        assert_eq!(config.queues.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.queues.batch_size, 16);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_example_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/storefront.example.yaml");
        let config = load_config(path).unwrap();
        assert_eq!(config.blobs.public_base_url, "http://localhost:8080/api/blobs");
        assert_eq!(config.queues.batch_size, 16);
        assert!(config.tables.azure.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tables:\n  sqlite:\n    path: /tmp/x.db").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.tables.sqlite.path, "/tmp/x.db");
        assert!(load_config("/definitely/not/here.yaml").is_err());
    }
}
