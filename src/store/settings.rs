// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Per-sensor arming flags and open-timeout policy

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{parse_armed, KeyFamily, StateStore};
use crate::config::EngineConfig;
use crate::db::PolicyStore;
use crate::error::{Error, Result};

/// Read-through view of per-sensor settings, with defaults on miss
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Escalation window for `source`
    async fn open_timeout(&self, source: &str) -> Duration;

    /// Whether notifications for `source` are delivered
    async fn is_armed(&self, source: &str) -> bool;
}

/// Administrative writes behind the arming and config topics
#[async_trait]
pub trait SettingsAdmin: Send + Sync {
    async fn set_armed(&self, source: &str, armed: bool) -> Result<()>;

    /// Store an open-timeout override, returning the new window
    async fn set_open_timeout(&self, source: &str, minutes: u32) -> Result<Duration>;
}

/// Arming lives in the state store, open-timeout overrides in the policy table
pub struct SensorSettings {
    store: Arc<dyn StateStore>,
    policies: Arc<dyn PolicyStore>,
    default_open_timeout: Duration,
    min_minutes: u32,
    max_minutes: u32,
}

impl SensorSettings {
    pub fn new(
        store: Arc<dyn StateStore>,
        policies: Arc<dyn PolicyStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            policies,
            default_open_timeout: config.open_timeout(),
            min_minutes: config.min_open_timeout_minutes,
            max_minutes: config.max_open_timeout_minutes,
        }
    }
}

fn minutes_to_duration(minutes: u32) -> Duration {
    Duration::from_secs(u64::from(minutes) * 60)
}

#[async_trait]
impl SettingsAdmin for SensorSettings {
    async fn set_armed(&self, source: &str, armed: bool) -> Result<()> {
        self.store
            .set(KeyFamily::Arming, source, if armed { "true" } else { "false" })
            .await?;
        info!(source, armed, "Arming updated");
        Ok(())
    }

    /// Rejects values outside the administrator bounds
    async fn set_open_timeout(&self, source: &str, minutes: u32) -> Result<Duration> {
        if minutes < self.min_minutes || minutes > self.max_minutes {
            return Err(Error::Config(format!(
                "open timeout must be between {} and {} minutes, got {}",
                self.min_minutes, self.max_minutes, minutes
            )));
        }
        self.policies.set_open_timeout_minutes(source, minutes).await?;
        info!(source, minutes, "Open timeout updated");
        Ok(minutes_to_duration(minutes))
    }
}

#[async_trait]
impl ConfigSource for SensorSettings {
    async fn open_timeout(&self, source: &str) -> Duration {
        match self.policies.open_timeout_minutes(source).await {
            Ok(Some(minutes)) => minutes_to_duration(minutes),
            Ok(None) => self.default_open_timeout,
            Err(e) => {
                warn!(source, "Reading open timeout policy failed, using default: {}", e);
                self.default_open_timeout
            }
        }
    }

    async fn is_armed(&self, source: &str) -> bool {
        match self.store.get(KeyFamily::Arming, source).await {
            Ok(Some(raw)) => parse_armed(&raw),
            Ok(None) => false,
            Err(e) => {
                warn!(source, "Reading arming state failed, treating as unarmed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryAuditLog;
    use crate::store::MemoryStore;

    fn settings() -> SensorSettings {
        SensorSettings::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryAuditLog::new()),
            &EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_defaults_on_miss() {
        let s = settings();
        assert!(!s.is_armed("garage").await);
        assert_eq!(s.open_timeout("garage").await, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_overrides() {
        let s = settings();
        s.set_armed("garage", true).await.unwrap();
        s.set_open_timeout("garage", 15).await.unwrap();

        assert!(s.is_armed("garage").await);
        assert!(!s.is_armed("front").await);
        assert_eq!(s.open_timeout("garage").await, Duration::from_secs(900));

        s.set_armed("garage", false).await.unwrap();
        assert!(!s.is_armed("garage").await);
    }

    #[tokio::test]
    async fn test_open_timeout_bounds() {
        let s = settings();
        assert!(matches!(s.set_open_timeout("garage", 0).await, Err(Error::Config(_))));
        assert!(matches!(s.set_open_timeout("garage", 10_000).await, Err(Error::Config(_))));
        assert_eq!(s.open_timeout("garage").await, Duration::from_secs(300));
    }
}
