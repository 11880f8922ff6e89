// SPDX-License-Identifier: GPL-3.0-only

//! Typed daemon configuration loaded from TOML

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/local-storage/local-storage.toml";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub log_dir: PathBuf,
    pub log_level: LoggingLevel,
    pub log_to_disk: bool,
    pub registry_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/var/log/local-storage"),
            log_level: LoggingLevel::Info,
            log_to_disk: true,
            registry_path: PathBuf::from("/var/lib/local-storage/registry.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct MountConfig {
    pub fstab_path: PathBuf,
    /// Upper bound for listing commands such as `lsblk`
    pub command_timeout_secs: u64,
    pub device_cache_ttl_secs: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fstab_path: PathBuf::from("/etc/fstab"),
            command_timeout_secs: 30,
            device_cache_ttl_secs: 5,
        }
    }
}

impl MountConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn device_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.device_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    pub enable: bool,
    pub default_mount_point: Option<String>,
    pub default_base_path: Option<String>,
    pub mount_options: String,
    pub sweep_interval_secs: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enable: true,
            default_mount_point: Some("/DATA".to_string()),
            default_base_path: Some("/var/lib/local-storage/files".to_string()),
            mount_options: "category.create=mfs,moveonenospc=true,minfreespace=1M,allow_other"
                .to_string(),
            sweep_interval_secs: 60,
        }
    }
}

impl MergeConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub mount: MountConfig,
    pub merge: MergeConfig,
}

impl Config {
    /// Load and validate `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let raw = fs::read_to_string(path)?;
            Self::parse(&raw)
                .map_err(|e| ServiceError::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.registry_path.as_os_str().is_empty() {
            return Err(ServiceError::Config("app.registry_path is empty".to_string()));
        }
        if self.app.log_to_disk && self.app.log_dir.as_os_str().is_empty() {
            return Err(ServiceError::Config(
                "app.log_dir is empty while log_to_disk is enabled".to_string(),
            ));
        }
        if self.mount.fstab_path.as_os_str().is_empty() {
            return Err(ServiceError::Config("mount.fstab_path is empty".to_string()));
        }
        if self.mount.command_timeout_secs == 0 {
            return Err(ServiceError::Config(
                "mount.command_timeout_secs must be positive".to_string(),
            ));
        }
        if self.merge.sweep_interval_secs == 0 {
            return Err(ServiceError::Config(
                "merge.sweep_interval_secs must be positive".to_string(),
            ));
        }
        for (field, value) in [
            ("merge.default_mount_point", &self.merge.default_mount_point),
            ("merge.default_base_path", &self.merge.default_base_path),
        ] {
            match value {
                Some(path) if !Path::new(path).is_absolute() => {
                    return Err(ServiceError::Config(format!(
                        "{field} must be an absolute path, got {path:?}"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
