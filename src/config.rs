//! Configuration management for chdkptp
//!
//! Provides configuration loading, saving, and management for the embedded
//! runtime, connection timing, file transfers and capture defaults.

use crate::errors::ChdkError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<ChdkConfig> = RwLock::new(ChdkConfig::load_layered_or_default());
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChdkConfig {
    pub runtime: RuntimeConfig,
    pub connection: ConnectionConfig,
    pub transfer: TransferConfig,
    pub capture: CaptureConfig,
}

/// Embedded Lua runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// chdkptp installation: the native core module plus its `lua/` tree
    pub chdkptp_path: PathBuf,
    /// chdkptp `cli_verbose` preference (0-3)
    pub verbosity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Delay before reconnecting, in milliseconds
    pub reconnect_wait_ms: u64,
    /// Delay between reboot and reconnect, in milliseconds
    pub reboot_wait_ms: u64,
    /// Give up on a play/record switch after this long
    pub mode_switch_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Default upload target on the camera
    pub upload_directory: String,
    /// Default directory for listings
    pub list_directory: String,
    /// Files fetched per batch by `batch_download`
    pub batch_size: u32,
    /// Recursion limit for batch transfers
    pub max_depth: u32,
    /// Overwrite existing local files in batch downloads
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Stream captures over USB instead of saving them to the card
    pub stream: bool,
    /// Remote capture timeout in milliseconds
    pub capture_timeout_ms: u64,
    /// JPEG quality for converted live-view frames (1-100)
    pub jpeg_quality: u8,
}

impl Default for ChdkConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            connection: ConnectionConfig {
                reconnect_wait_ms: 2000,
                reboot_wait_ms: 3500,
                mode_switch_timeout_ms: 3000,
            },
            transfer: TransferConfig {
                upload_directory: "A/".to_string(),
                list_directory: "A/DCIM".to_string(),
                batch_size: 20,
                max_depth: 100,
                overwrite: false,
            },
            capture: CaptureConfig {
                stream: true,
                capture_timeout_ms: 30000,
                jpeg_quality: 90,
            },
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chdkptp_path: PathBuf::from("vendor/chdkptp"),
            verbosity: 2,
        }
    }
}

impl ChdkConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ChdkError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ChdkError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ChdkConfig = toml::from_str(&contents)
            .map_err(|e| ChdkError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load defaults, then the TOML file, then `CHDKPTP__SECTION__KEY`
    /// environment overrides.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, ChdkError> {
        let defaults = ::config::Config::try_from(&Self::default())?;
        let config = ::config::Config::builder()
            .add_source(defaults)
            .add_source(::config::File::from(path.as_ref()).required(false))
            .add_source(
                ::config::Environment::with_prefix("CHDKPTP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ChdkError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ChdkError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ChdkError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| ChdkError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("chdkptp.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_layered_or_default() -> Self {
        Self::load_layered(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.runtime.verbosity > 3 {
            return Err("Verbosity must be between 0 and 3".to_string());
        }
        if self.connection.mode_switch_timeout_ms < 10 {
            return Err("Mode switch timeout must be at least 10ms".to_string());
        }
        if self.transfer.batch_size == 0 {
            return Err("Batch size must be at least 1".to_string());
        }
        if self.transfer.max_depth == 0 {
            return Err("Max depth must be at least 1".to_string());
        }
        for dir in [&self.transfer.upload_directory, &self.transfer.list_directory] {
            if dir.trim().is_empty() {
                return Err("Transfer directories must not be empty".to_string());
            }
        }
        if self.capture.capture_timeout_ms == 0 {
            return Err("Capture timeout must be positive".to_string());
        }
        if self.capture.jpeg_quality == 0 || self.capture.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        Ok(())
    }
}

/// Snapshot of the process-wide configuration.
pub fn global() -> ChdkConfig {
    match GLOBAL_CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replace the process-wide configuration after validating it.
pub fn set_global(config: ChdkConfig) -> Result<(), ChdkError> {
    config.validate().map_err(ChdkError::Config)?;
    let mut guard = GLOBAL_CONFIG
        .write()
        .map_err(|e| ChdkError::Config(format!("Failed to write config: {}", e)))?;
    *guard = config;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChdkConfig::default();
        assert_eq!(config.connection.reconnect_wait_ms, 2000);
        assert_eq!(config.connection.reboot_wait_ms, 3500);
        assert_eq!(config.transfer.list_directory, "A/DCIM");
        assert!(config.capture.stream);
    }

    #[test]
    fn test_config_validation() {
        let config = ChdkConfig::default();
        assert!(config.validate().is_ok());

        let mut bad_config = config.clone();
        bad_config.transfer.batch_size = 0;
        assert!(bad_config.validate().is_err());

        let mut bad_quality = ChdkConfig::default();
        bad_quality.capture.jpeg_quality = 101;
        assert!(bad_quality.validate().is_err());

        let mut bad_verbosity = ChdkConfig::default();
        bad_verbosity.runtime.verbosity = 9;
        assert!(bad_verbosity.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("chdkptp.toml");

        let mut config = ChdkConfig::default();
        config.transfer.batch_size = 5;
        assert!(config.save_to_file(&config_path).is_ok());

        let loaded = ChdkConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let config = ChdkConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[runtime]"));
        assert!(toml_string.contains("[connection]"));
        assert!(toml_string.contains("[transfer]"));
        assert!(toml_string.contains("[capture]"));
        assert!(toml_string.contains("chdkptp_path"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ChdkConfig::load_from_file("nonexistent_file.toml");
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), ChdkConfig::default());
    }

    #[test]
    fn test_layered_load_reads_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("chdkptp.toml");
        let mut config = ChdkConfig::default();
        config.connection.mode_switch_timeout_ms = 5000;
        config.save_to_file(&config_path).unwrap();

        let loaded = ChdkConfig::load_layered(&config_path).unwrap();
        assert_eq!(loaded.connection.mode_switch_timeout_ms, 5000);
        assert_eq!(loaded.transfer, ChdkConfig::default().transfer);
    }

    #[test]
    fn test_layered_load_without_file_gives_defaults() {
        let loaded = ChdkConfig::load_layered("does_not_exist.toml").unwrap();
        assert_eq!(loaded.capture, ChdkConfig::default().capture);
    }
}
