//! Configuration file support for rkflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RKFLASH_*)
//! 3. Local config file (./rkflash.toml)
//! 4. Global config file (~/.config/rkflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use rkflash::UsbConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "rkflash.toml";

/// Device selection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB Vendor ID to match.
    pub vid: Option<u16>,
    /// USB Product ID to match.
    pub pid: Option<u16>,
    /// Per-transfer timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Container extraction settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnpackConfig {
    /// Default output directory for `unpack`.
    pub output_dir: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device configuration.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Unpack configuration.
    #[serde(default)]
    pub unpack: UnpackConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rkflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.device.vid.is_some() {
            self.device.vid = other.device.vid;
        }
        if other.device.pid.is_some() {
            self.device.pid = other.device.pid;
        }
        if other.device.timeout_ms.is_some() {
            self.device.timeout_ms = other.device.timeout_ms;
        }
        if other.unpack.output_dir.is_some() {
            self.unpack.output_dir = other.unpack.output_dir;
        }
    }

    /// USB selection built from the device section.
    ///
    /// `timeout_ms` from the command line or environment takes precedence.
    pub fn usb_config(&self, timeout_ms: Option<u64>) -> UsbConfig {
        let mut usb = UsbConfig::default();
        if let Some(vid) = self.device.vid {
            usb.vendor_id = vid;
        }
        usb.product_id = self.device.pid;
        if let Some(ms) = timeout_ms.or(self.device.timeout_ms) {
            usb.timeout = Duration::from_millis(ms);
        }
        usb
    }
}
