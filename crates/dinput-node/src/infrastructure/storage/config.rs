//! TOML-based configuration for a distributed-input node.
//!
//! Reads and writes `NodeConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\DInput\config.toml`
//! - Linux:    `~/.config/dinput/config.toml` (or `$XDG_CONFIG_HOME/dinput`)
//! - macOS:    `~/Library/Application Support/DInput/config.toml`
//!
//! An explicit path given on the command line overrides the platform path.
//!
//! # Example (for beginners)
//!
//! ```toml
//! [node]
//! device_id = "desk-pc"
//! log_level = "debug"
//!
//! [network]
//! source_listen = "0.0.0.0:24810"
//! sink_listen = "0.0.0.0:24811"
//!
//! [[peers]]
//! device_id = "laptop"
//! sink_addr = "192.168.1.20:24811"
//!
//! [sink]
//! allow_list = [[29, 56, 111]]
//! batch_max = 16
//!
//! [[sink.devices]]
//! handle = "mouse-0"
//! name = "USB Mouse"
//! types = 1
//! ```
//!
//! Every field has a `#[serde(default = "...")]` helper, so any section or
//! key may be left out.  A missing file means "all defaults"; the device id
//! then defaults to a fresh UUID v4.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dinput_core::{AllowList, DeviceId, DeviceInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An address field is not a valid `host:port` socket address.
    #[error("invalid address `{value}` for {field}")]
    InvalidAddress { field: String, value: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub sink: SinkSection,
}

/// Identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// This node's device id as other nodes know it.
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Listen addresses of the two transport endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    #[serde(default = "default_source_listen")]
    pub source_listen: String,
    #[serde(default = "default_sink_listen")]
    pub sink_listen: String,
}

/// Where to reach one remote node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerEntry {
    pub device_id: String,
    /// The peer's source endpoint, used for relay requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_addr: Option<String>,
    /// The peer's sink endpoint, used for direct requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_addr: Option<String>,
}

/// Source-role tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSection {
    #[serde(default = "default_latency_probe_interval_ms")]
    pub latency_probe_interval_ms: u64,
    #[serde(default = "default_source_queue_capacity")]
    pub queue_capacity: usize,
}

/// Sink-role tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinkSection {
    /// Key combinations a source may use to take sharing back locally.
    #[serde(default)]
    pub allow_list: AllowList,
    #[serde(default = "default_sink_queue_capacity")]
    pub queue_capacity: usize,
    /// Captured events per `InputEventBatch`.
    #[serde(default = "default_batch_max")]
    pub batch_max: usize,
    /// Devices exposed by the simulated collector when no hardware backend
    /// is compiled in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceInfo>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_id() -> String {
    Uuid::new_v4().to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_source_listen() -> String {
    "0.0.0.0:24810".to_string()
}
fn default_sink_listen() -> String {
    "0.0.0.0:24811".to_string()
}
fn default_latency_probe_interval_ms() -> u64 {
    1000
}
fn default_source_queue_capacity() -> usize {
    256
}
fn default_sink_queue_capacity() -> usize {
    1024
}
fn default_batch_max() -> usize {
    32
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            source_listen: default_source_listen(),
            sink_listen: default_sink_listen(),
        }
    }
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            latency_probe_interval_ms: default_latency_probe_interval_ms(),
            queue_capacity: default_source_queue_capacity(),
        }
    }
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            allow_list: AllowList::new(),
            queue_capacity: default_sink_queue_capacity(),
            batch_max: default_batch_max(),
            devices: Vec::new(),
        }
    }
}

// ── Typed accessors ───────────────────────────────────────────────────────────

impl NodeConfig {
    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.node.device_id.clone())
    }

    /// `None` when `latency_probe_interval_ms` is zero.
    pub fn latency_probe_interval(&self) -> Option<Duration> {
        match self.source.latency_probe_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if the field does not parse.
    pub fn source_listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("network.source_listen", &self.network.source_listen)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if the field does not parse.
    pub fn sink_listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("network.sink_listen", &self.network.sink_listen)
    }
}

impl PeerEntry {
    /// Parses the configured endpoint addresses.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] for the first address that
    /// does not parse.
    pub fn addresses(&self) -> Result<(Option<SocketAddr>, Option<SocketAddr>), ConfigError> {
        let source = self
            .source_addr
            .as_deref()
            .map(|a| parse_addr(&format!("peers.{}.source_addr", self.device_id), a))
            .transpose()?;
        let sink = self
            .sink_addr
            .as_deref()
            .map(|a| parse_addr(&format!("peers.{}.sink_addr", self.device_id), a))
            .transpose()?;
        Ok((source, sink))
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field: field.to_string(),
        value: value.to_string(),
    })
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `NodeConfig` from the platform path, or defaults if absent.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<NodeConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `NodeConfig` from `path`, returning `NodeConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<NodeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &NodeConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `DInput`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("DInput"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("dinput"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("DInput")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
