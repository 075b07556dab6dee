// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Current-state store and read-through sensor settings

mod settings;

pub use settings::*;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::model::{LastSeen, SensorState, SensorStatus};
use crate::error::{Error, Result};

/// Independent key namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Status,
    Arming,
    Heartbeat,
}

impl KeyFamily {
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyFamily::Status => "state/",
            KeyFamily::Arming => "arming/",
            KeyFamily::Heartbeat => "heartbeat/",
        }
    }

    pub fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix(), key)
    }
}

/// Key-value store holding the latest value per key
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, family: KeyFamily, key: &str) -> Result<Option<String>>;

    async fn set(&self, family: KeyFamily, key: &str, value: &str) -> Result<()>;

    /// Every `(key, value)` in a family, keys without the prefix
    async fn scan(&self, family: KeyFamily) -> Result<Vec<(String, String)>>;

    async fn get_status(&self, source: &str) -> Result<Option<SensorStatus>> {
        match self.get(KeyFamily::Status, source).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_status(&self, status: &SensorStatus) -> Result<()> {
        let raw = serde_json::to_string(status)?;
        self.set(KeyFamily::Status, &status.source, &raw).await
    }

    async fn set_last_seen(&self, last_seen: &LastSeen) -> Result<()> {
        let raw = serde_json::to_string(last_seen)?;
        self.set(KeyFamily::Heartbeat, &last_seen.heartbeat.identity, &raw)
            .await
    }

    async fn get_last_seen(&self, identity: &str) -> Result<Option<LastSeen>> {
        match self.get(KeyFamily::Heartbeat, identity).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Everything a freshly connected UI needs
pub async fn snapshot(store: &dyn StateStore) -> Result<SensorState> {
    let mut sensors = Vec::new();
    for (_, raw) in store.scan(KeyFamily::Status).await? {
        sensors.push(serde_json::from_str::<SensorStatus>(&raw)?);
    }
    sensors.sort_by(|a, b| a.source.cmp(&b.source));

    let arming = store
        .scan(KeyFamily::Arming)
        .await?
        .into_iter()
        .map(|(source, raw)| (source, parse_armed(&raw)))
        .collect();

    Ok(SensorState { sensors, arming })
}

pub(crate) fn parse_armed(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sled database directory
    pub path: PathBuf,

    /// Background flush interval in milliseconds
    pub flush_every_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/state"),
            flush_every_ms: 500,
        }
    }
}

/// sled-backed store
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::Config::new()
            .path(&config.path)
            .flush_every_ms(Some(config.flush_every_ms))
            .open()?;
        info!("State store opened at {:?}", config.path);
        Ok(Self { db })
    }

    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::Store(e.to_string()))
}

#[async_trait]
impl StateStore for SledStore {
    async fn get(&self, family: KeyFamily, key: &str) -> Result<Option<String>> {
        match self.db.get(family.key(key))? {
            Some(value) => Ok(Some(utf8(&value)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, family: KeyFamily, key: &str, value: &str) -> Result<()> {
        self.db.insert(family.key(key), value.as_bytes())?;
        Ok(())
    }

    async fn scan(&self, family: KeyFamily) -> Result<Vec<(String, String)>> {
        let prefix = family.prefix();
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            let key = utf8(&key)?;
            out.push((key[prefix.len()..].to_string(), utf8(&value)?));
        }
        Ok(out)
    }
}

/// In-memory store for mock mode and tests
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, family: KeyFamily, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(&family.key(key)).cloned())
    }

    async fn set(&self, family: KeyFamily, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .insert(family.key(key), value.to_string());
        Ok(())
    }

    async fn scan(&self, family: KeyFamily) -> Result<Vec<(String, String)>> {
        let prefix = family.prefix();
        Ok(self
            .entries
            .read()
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|k| (k.to_string(), v.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Heartbeat, Status};

    async fn exercise(store: &dyn StateStore) {
        assert!(store.get_status("garage").await.unwrap().is_none());

        let status = SensorStatus::new("garage", Status::Open);
        store.set_status(&status).await.unwrap();
        store.set(KeyFamily::Arming, "garage", "true").await.unwrap();
        store
            .set_last_seen(&LastSeen {
                heartbeat: Heartbeat::sensor("garage"),
                timestamp: "1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(store.get_status("garage").await.unwrap(), Some(status.clone()));
        assert_eq!(
            store.get_last_seen("garage").await.unwrap().unwrap().timestamp,
            "1"
        );

        // Families do not bleed into each other
        assert_eq!(store.scan(KeyFamily::Status).await.unwrap().len(), 1);
        assert_eq!(store.scan(KeyFamily::Heartbeat).await.unwrap().len(), 1);

        let snap = snapshot(store).await.unwrap();
        assert_eq!(snap.sensors, vec![status]);
        assert_eq!(snap.arming.get("garage"), Some(&true));
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_sled_store() {
        exercise(&SledStore::temporary().unwrap()).await;
    }

    #[tokio::test]
    async fn test_sled_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            path: dir.path().join("state"),
            ..StoreConfig::default()
        };
        {
            let store = SledStore::open(&config).unwrap();
            store
                .set_status(&SensorStatus::new("front", Status::Closed))
                .await
                .unwrap();
            store.flush().await.unwrap();
        }
        let store = SledStore::open(&config).unwrap();
        let status = store.get_status("front").await.unwrap().unwrap();
        assert_eq!(status.status, Status::Closed);
    }

    #[test]
    fn test_parse_armed() {
        assert!(parse_armed("true"));
        assert!(parse_armed("TRUE "));
        assert!(!parse_armed("false"));
        assert!(!parse_armed(""));
    }
}
