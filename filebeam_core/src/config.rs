use crate::protocol::{BROADCAST_ADDR, DISCOVERY_PORT, TRANSFER_PORT};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "filebeam";
const APP_NAME: &str = "filebeam";
const CONFIG_FILE: &str = "config.json";

/// Overrides the config directory (used by tests and portable installs)
pub const CONFIG_DIR_ENV: &str = "FILEBEAM_CONFIG_DIR";

/// Bytes moved per read/write call
pub const BUFFER_SIZE: usize = 4096;

/// Emit progress once the percentage advances this much
pub const PROGRESS_UPDATE_PERCENTAGE: u8 = 5;

/// Emit progress at least every 256 KiB
pub const PROGRESS_UPDATE_BYTES: u64 = 256 * 1024;

/// How long a discovery round collects replies
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Knobs shared by both sides of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub progress_step_percent: u8,
    pub progress_step_bytes: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: BUFFER_SIZE,
            progress_step_percent: PROGRESS_UPDATE_PERCENTAGE,
            progress_step_bytes: PROGRESS_UPDATE_BYTES,
        }
    }
}

/// Where a discovery round sends its probe and how long it waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub target: SocketAddr,
    pub timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            target: SocketAddr::from((BROADCAST_ADDR, DISCOVERY_PORT)),
            timeout: DISCOVERY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download_path: PathBuf,
    pub transfer_port: u16,
    pub discovery_port: u16,
    pub discovery_timeout_ms: u64,
    /// Name advertised in discovery replies; host name when unset
    pub device_name: Option<String>,
    pub transfer: TransferSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_dir(),
            transfer_port: TRANSFER_PORT,
            discovery_port: DISCOVERY_PORT,
            discovery_timeout_ms: DISCOVERY_TIMEOUT.as_millis() as u64,
            device_name: None,
            transfer: TransferSettings::default(),
        }
    }
}

impl AppConfig {
    /// `config.json` inside [`get_config_dir`]
    pub fn config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> std::io::Result<()> {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Ok(()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            target: SocketAddr::from((BROADCAST_ADDR, self.discovery_port)),
            timeout: Duration::from_millis(self.discovery_timeout_ms),
        }
    }

    pub fn device_name(&self) -> String {
        self.device_name.clone().unwrap_or_else(local_device_name)
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// ~/Downloads/FileBeam, or ./FileBeam when no home directory is known
pub fn default_download_dir() -> PathBuf {
    UserDirs::new()
        .map(|dirs| {
            dirs.download_dir()
                .map(|d| d.to_path_buf())
                .unwrap_or_else(|| dirs.home_dir().join("Downloads"))
        })
        .unwrap_or_else(|| PathBuf::from("."))
        .join("FileBeam")
}

pub fn local_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "Unknown-PC".to_string())
}
