//! TOML-based configuration for the agent service.
//!
//! Reads and writes `AgentConfig` in the platform-appropriate directory:
//! - Windows:  `%PROGRAMDATA%\Up2date\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/up2date/config.toml` (or `~/.config/up2date`)
//! - macOS:    `~/Library/Application Support/Up2date/config.toml`
//!
//! The agent runs as a machine-wide service, so on Windows the file lives
//! under `ProgramData` rather than a user profile.
//!
//! # Example
//!
//! ```toml
//! [service]
//! log_level = "info"
//! device_id = "0b0e6f5c-4f0a-4d43-9d6f-0a3a8d7b9e11"
//!
//! [connection]
//! provisioning_url = "https://dps.ritms.online/provisioning"
//! x_apig_token = ""
//! certificate_file = "client.crt"
//! reconnect_interval_secs = 30
//!
//! [connection.attributes]
//! site = "plant-3"
//!
//! [packages]
//! refresh_interval_secs = 60
//! msi_poll_interval_ms = 1000
//! script_interpreter = "powershell.exe"
//! ```
//!
//! # Serde default values
//!
//! Every field has a default, so a missing file, a missing section, or a
//! file written by an older agent all load cleanly.  Paths left unset
//! (`download_location`, `helper_scripts_dir`) are resolved at startup
//! relative to the config directory or the executable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

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
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level agent configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub packages: PackagesConfig,
}

/// Service-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Stable identity of this device.  Generated on first run.
    #[serde(default)]
    pub device_id: String,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default = "default_provisioning_url")]
    pub provisioning_url: String,
    /// API gateway token passed to the native module.
    #[serde(default)]
    pub x_apig_token: String,
    /// Client certificate file; relative paths are resolved against the
    /// config directory.
    #[serde(default = "default_certificate_file")]
    pub certificate_file: PathBuf,
    /// Pause between the end of one session and the next attempt.
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
    /// Extra attributes reported on every config request.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Package tracking and installation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackagesConfig {
    /// Download directory.  Defaults to `<config dir>/packages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_location: Option<PathBuf>,
    /// Period of the background refresh pass.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Poll period while waiting for the native installer.
    #[serde(default = "default_msi_poll_interval_ms")]
    pub msi_poll_interval_ms: u64,
    /// Interpreter for package-manager install scripts.
    #[serde(default = "default_script_interpreter")]
    pub script_interpreter: String,
    /// Directory of helper scripts.  Defaults to `<exe dir>/PS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper_scripts_dir: Option<PathBuf>,
    /// Package manager queried by the installation detector.
    #[serde(default = "default_choco_program")]
    pub choco_program: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_provisioning_url() -> String {
    "https://dps.ritms.online/provisioning".to_string()
}
fn default_certificate_file() -> PathBuf {
    PathBuf::from("client.crt")
}
fn default_reconnect_interval_secs() -> u64 {
    30
}
fn default_refresh_interval_secs() -> u64 {
    60
}
fn default_msi_poll_interval_ms() -> u64 {
    1000
}
fn default_script_interpreter() -> String {
    "powershell.exe".to_string()
}
fn default_choco_program() -> String {
    "choco".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device_id: String::new(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            provisioning_url: default_provisioning_url(),
            x_apig_token: String::new(),
            certificate_file: default_certificate_file(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            attributes: BTreeMap::new(),
        }
    }
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            download_location: None,
            refresh_interval_secs: default_refresh_interval_secs(),
            msi_poll_interval_ms: default_msi_poll_interval_ms(),
            script_interpreter: default_script_interpreter(),
            helper_scripts_dir: None,
            choco_program: default_choco_program(),
        }
    }
}

impl ConnectionConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Certificate path, resolved against `config_dir` when relative.
    pub fn certificate_path(&self, config_dir: &Path) -> PathBuf {
        config_dir.join(&self.certificate_file)
    }
}

impl PackagesConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn msi_poll_interval(&self) -> Duration {
        Duration::from_millis(self.msi_poll_interval_ms)
    }

    /// Download directory, defaulting to `<config dir>/packages`.
    pub fn download_location(&self, config_dir: &Path) -> PathBuf {
        match &self.download_location {
            Some(path) => config_dir.join(path),
            None => config_dir.join("packages"),
        }
    }

    /// Helper script directory, defaulting to `PS` next to the executable.
    pub fn helper_scripts_dir(&self) -> PathBuf {
        if let Some(dir) = &self.helper_scripts_dir {
            return dir.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default()
            .join("PS")
    }
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

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AgentConfig` from `path`, returning the defaults if the file does
/// not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AgentConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AgentConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AgentConfig) -> Result<(), ConfigError> {
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

/// Loads the config at `path`; on first run (no device id yet) generates a
/// device id and writes the file back.
///
/// # Errors
///
/// See [`load_config_from`] and [`save_config_to`].
pub fn load_or_init(path: &Path) -> Result<AgentConfig, ConfigError> {
    let mut config = load_config_from(path)?;
    if config.service.device_id.trim().is_empty() {
        config.service.device_id = Uuid::new_v4().to_string();
        save_config_to(path, &config)?;
    }
    Ok(config)
}

/// Resolves the platform config directory for the agent.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %PROGRAMDATA% e.g. C:\ProgramData
        std::env::var_os("PROGRAMDATA").map(|p| PathBuf::from(p).join("Up2date"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("up2date"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("Up2date"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("up2date_config_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config_has_expected_intervals() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.connection.reconnect_interval(), Duration::from_secs(30));
        assert_eq!(cfg.packages.refresh_interval(), Duration::from_secs(60));
        assert_eq!(cfg.packages.msi_poll_interval(), Duration::from_millis(1000));
        assert_eq!(cfg.service.log_level, "info");
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AgentConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn test_deserialize_partial_connection_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[connection]
x_apig_token = "secret"

[connection.attributes]
site = "plant-3"
"#;

        // Act
        let cfg: AgentConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.connection.x_apig_token, "secret");
        assert_eq!(cfg.connection.attributes.get("site").map(String::as_str), Some("plant-3"));
        // Unspecified fields keep their defaults
        assert_eq!(cfg.connection.reconnect_interval_secs, 30);
        assert_eq!(cfg.packages.script_interpreter, "powershell.exe");
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let dir = temp_dir();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let dir = temp_dir();
        let cfg = load_config_from(&dir.join("config.toml")).unwrap();
        assert_eq!(cfg, AgentConfig::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_or_init_generates_and_persists_device_id() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("nested").join("config.toml");

        // Act
        let first = load_or_init(&path).unwrap();
        let second = load_or_init(&path).unwrap();

        // Assert
        assert!(Uuid::parse_str(&first.service.device_id).is_ok());
        assert_eq!(first.service.device_id, second.service.device_id);
        assert!(path.is_file());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("config.toml");
        let mut cfg = AgentConfig::default();
        cfg.service.log_level = "debug".to_string();
        cfg.packages.download_location = Some(PathBuf::from("/srv/packages"));

        // Act
        save_config_to(&path, &cfg).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let cfg = AgentConfig::default();
        let base = Path::new("/etc/up2date");

        assert_eq!(cfg.connection.certificate_path(base), base.join("client.crt"));
        assert_eq!(cfg.packages.download_location(base), base.join("packages"));
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
