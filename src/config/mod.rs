// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Configuration module

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::notify::NotifierConfig;
use crate::store::StoreConfig;
use crate::streaming::{BusConfig, StreamingConfig};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// MQTT bus configuration
    pub bus: BusConfig,

    /// Current-state store configuration
    pub store: StoreConfig,

    /// Audit database configuration
    pub database: DatabaseConfig,

    /// Notification configuration
    pub notifier: NotifierConfig,

    /// Live broadcast configuration
    pub streaming: StreamingConfig,

    /// Timeout policy
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "doorwatch".to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            bus: BusConfig::default(),
            store: StoreConfig::default(),
            database: DatabaseConfig::default(),
            notifier: NotifierConfig::default(),
            streaming: StreamingConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {:?}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing config {:?}", path))?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Point the store and database under `data_dir`
    pub fn relocate(&mut self, data_dir: PathBuf) {
        self.store.path = data_dir.join("state");
        self.database.path = data_dir.join("audit.db");
        self.data_dir = data_dir;
    }

    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        anyhow::ensure!(
            e.min_open_timeout_minutes <= e.max_open_timeout_minutes,
            "engine.min_open_timeout_minutes ({}) exceeds engine.max_open_timeout_minutes ({})",
            e.min_open_timeout_minutes,
            e.max_open_timeout_minutes
        );
        anyhow::ensure!(e.open_timeout_secs > 0, "engine.open_timeout_secs must be positive");
        anyhow::ensure!(
            e.heartbeat_timeout_secs > 0,
            "engine.heartbeat_timeout_secs must be positive"
        );
        Ok(())
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("doorwatch"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Timeout policy for the liveness and escalation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default open-escalation window in seconds
    pub open_timeout_secs: u64,

    /// Heartbeat window in seconds, shared by every identity
    pub heartbeat_timeout_secs: u64,

    /// Smallest per-sensor open-timeout override accepted
    pub min_open_timeout_minutes: u32,

    /// Largest per-sensor open-timeout override accepted
    pub max_open_timeout_minutes: u32,

    /// Log notifications instead of sending them
    pub mock_mode: bool,

    /// How long shutdown waits for in-flight notifications
    pub shutdown_grace_secs: u64,

    /// Inbound message queue depth
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            open_timeout_secs: 300,
            heartbeat_timeout_secs: 300,
            min_open_timeout_minutes: 1,
            max_open_timeout_minutes: 60,
            mock_mode: false,
            shutdown_grace_secs: 5,
            queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database path
    pub path: PathBuf,

    /// Rows per report page
    pub page_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/audit.db"),
            page_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_create_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.engine.open_timeout_secs, created.engine.open_timeout_secs);
        assert_eq!(loaded.bus.broker, created.bus.broker);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nopen_timeout_secs = 60\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.engine.open_timeout(), Duration::from_secs(60));
        assert_eq!(config.engine.heartbeat_timeout(), Duration::from_secs(300));
        assert_eq!(config.database.page_size, 100);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[engine]\nmin_open_timeout_minutes = 30\nmax_open_timeout_minutes = 5\n",
        )
        .unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_relocate() {
        let mut config = Config::default();
        config.relocate(PathBuf::from("/var/lib/doorwatch"));
        assert_eq!(config.database.path, PathBuf::from("/var/lib/doorwatch/audit.db"));
        assert_eq!(config.store.path, PathBuf::from("/var/lib/doorwatch/state"));
    }
}
