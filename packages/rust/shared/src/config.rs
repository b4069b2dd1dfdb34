//! Application configuration for woof-rs.
//!
//! User config lives at `~/.woof-rs/woof.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WoofError};
use crate::types::{CompressionLevel, DEFAULT_ARCHIVE_NAME};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "woof.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".woof-rs";

// ---------------------------------------------------------------------------
// Config structs (matching woof.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Share defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// HTTP server tuning.
    #[serde(default)]
    pub server: ServerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Address to listen on.
    #[serde(default = "default_ip")]
    pub ip: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of downloads to serve before exiting.
    #[serde(default = "default_count")]
    pub count: u32,

    /// Gzip level for generated archives.
    #[serde(default)]
    pub compression: CompressionLevel,

    /// File name offered for generated archives.
    #[serde(default = "default_archive_name")]
    pub archive_name: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            count: default_count(),
            compression: CompressionLevel::default(),
            archive_name: default_archive_name(),
        }
    }
}

fn default_ip() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    7878
}
fn default_count() -> u32 {
    1
}
fn default_archive_name() -> String {
    DEFAULT_ARCHIVE_NAME.into()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Seconds to wait for a client to finish sending its request head.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Seconds a download may go without the client accepting more bytes.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Size of the buffer used to stream the payload.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_read_timeout() -> u64 {
    30
}
fn default_write_timeout() -> u64 {
    30
}
fn default_buffer_size() -> usize {
    8 * 1024
}

// ---------------------------------------------------------------------------
// Share config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime share configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ShareConfig {
    /// Files or directories to send.
    pub paths: Vec<PathBuf>,
    /// Address to listen on.
    pub ip: String,
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Downloads to serve before exiting.
    pub count: u32,
    /// Gzip level for generated archives.
    pub compression: CompressionLevel,
    /// File name offered for generated archives.
    pub archive_name: String,
    /// Directory that holds the scratch directory for generated archives.
    pub archive_dir: PathBuf,
    /// Deadline for reading a request head.
    pub read_timeout: Duration,
    /// Deadline for a stalled client to accept more of the body.
    pub write_timeout: Duration,
    /// Streaming buffer size in bytes.
    pub buffer_size: usize,
}

impl From<&AppConfig> for ShareConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            paths: Vec::new(),
            ip: config.defaults.ip.clone(),
            port: config.defaults.port,
            count: config.defaults.count,
            compression: config.defaults.compression,
            archive_name: config.defaults.archive_name.clone(),
            archive_dir: std::env::temp_dir(),
            read_timeout: Duration::from_secs(config.server.read_timeout_secs),
            write_timeout: Duration::from_secs(config.server.write_timeout_secs),
            buffer_size: config.server.buffer_size,
        }
    }
}

impl ShareConfig {
    /// `ip:port` string handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Reject values that would make the share meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(WoofError::config("count must be at least 1"));
        }
        if self.read_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(WoofError::config("timeouts must be greater than zero"));
        }
        if self.buffer_size == 0 {
            return Err(WoofError::config("buffer_size must be greater than zero"));
        }
        validate_archive_name(&self.archive_name)
    }
}

/// The archive name ends up in a `Content-Disposition` header and in a file
/// path, so it must be a bare file name without quotes or line breaks.
fn validate_archive_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '"' | '\r' | '\n'));
    if bad {
        return Err(WoofError::config(format!(
            "invalid archive name '{name}': must be a plain file name"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.woof-rs/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| WoofError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.woof-rs/woof.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| WoofError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| WoofError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    init_config_in(&dir)
}

/// Write a default config file into `dir`, creating it if needed.
pub fn init_config_in(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| WoofError::io(dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| WoofError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| WoofError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
