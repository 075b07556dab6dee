// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Database module - status audit log and per-sensor policy table

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::core::model::{SensorStatus, Status};
use crate::error::{Error, Result};

/// Append-only record of every status transition
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, status: &SensorStatus) -> Result<()>;
}

/// Storage for per-sensor open-timeout overrides
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn open_timeout_minutes(&self, source: &str) -> Result<Option<u32>>;

    async fn set_open_timeout_minutes(&self, source: &str, minutes: u32) -> Result<()>;
}

/// One page of audit history
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPage {
    pub statuses: Vec<SensorStatus>,
    pub page: usize,
    pub pages: usize,
}

/// SQLite-backed audit log
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    page_size: usize,
}

impl Database {
    /// Open or create database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&config.path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let db = Self::with_connection(conn, config.page_size)?;
        info!("Database opened at {:?}", config.path);
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, DatabaseConfig::default().page_size)
    }

    fn with_connection(conn: Connection, page_size: usize) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            page_size: page_size.max(1),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS status (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                version TEXT NOT NULL DEFAULT '',
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_status_source ON status(source);
            CREATE INDEX IF NOT EXISTS idx_status_timestamp ON status(timestamp);

            CREATE TABLE IF NOT EXISTS sensor_config (
                source TEXT PRIMARY KEY,
                open_timeout_minutes INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )?;

        Ok(())
    }

    /// Store a status record
    pub fn append_status(&self, status: &SensorStatus) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO status (source, status, timestamp, version) VALUES (?1, ?2, ?3, ?4)",
            params![
                status.source,
                status.status.as_str(),
                status.timestamp,
                status.schema_version
            ],
        )?;
        Ok(())
    }

    /// Newest-first page of history for one sensor, or every sensor with `"all"`
    pub fn query_statuses(&self, source: &str, page: usize) -> Result<StatusPage> {
        let page = page.max(1);
        let offset = (self.page_size * (page - 1)) as i64;
        let limit = self.page_size as i64;
        let all = source.eq_ignore_ascii_case("all");
        let conn = self.conn.lock();

        let count: i64 = if all {
            conn.query_row("SELECT COUNT(*) FROM status", [], |row| row.get(0))?
        } else {
            conn.query_row(
                "SELECT COUNT(*) FROM status WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )?
        };

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<SensorStatus> {
            let status: String = row.get(1)?;
            Ok(SensorStatus {
                source: row.get(0)?,
                status: Status::from(status),
                timestamp: row.get(2)?,
                schema_version: row.get(3)?,
            })
        };

        let statuses = if all {
            let mut stmt = conn.prepare(
                "SELECT source, status, timestamp, version FROM status
                 ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit, offset], map_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT source, status, timestamp, version FROM status WHERE source = ?1
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(params![source, limit, offset], map_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let pages = (count as usize).div_ceil(self.page_size);

        Ok(StatusPage {
            statuses,
            page,
            pages,
        })
    }

    pub fn status_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM status", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn get_open_timeout(&self, source: &str) -> Result<Option<u32>> {
        let conn = self.conn.lock();
        let minutes = conn
            .query_row(
                "SELECT open_timeout_minutes FROM sensor_config WHERE source = ?1",
                params![source],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        Ok(minutes)
    }

    pub fn set_open_timeout(&self, source: &str, minutes: u32) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO sensor_config (source, open_timeout_minutes, updated_at)
             VALUES (?1, ?2, ?3)",
            params![source, minutes, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Run a blocking closure against this database off the async workers
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Database {
            conn: self.conn.clone(),
            page_size: self.page_size,
        };
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| Error::Audit(format!("database task failed: {}", e)))?
    }
}

#[async_trait]
impl AuditLog for Database {
    async fn append(&self, status: &SensorStatus) -> Result<()> {
        let status = status.clone();
        self.blocking(move |db| db.append_status(&status)).await
    }
}

#[async_trait]
impl PolicyStore for Database {
    async fn open_timeout_minutes(&self, source: &str) -> Result<Option<u32>> {
        let source = source.to_string();
        self.blocking(move |db| db.get_open_timeout(&source)).await
    }

    async fn set_open_timeout_minutes(&self, source: &str, minutes: u32) -> Result<()> {
        let source = source.to_string();
        self.blocking(move |db| db.set_open_timeout(&source, minutes))
            .await
    }
}

/// In-memory audit log and policy table for mock mode and tests
#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<SensorStatus>>,
    policies: Mutex<HashMap<String, u32>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SensorStatus> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn count_for(&self, source: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|s| s.source == source)
            .count()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, status: &SensorStatus) -> Result<()> {
        self.records.lock().push(status.clone());
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for MemoryAuditLog {
    async fn open_timeout_minutes(&self, source: &str) -> Result<Option<u32>> {
        Ok(self.policies.lock().get(source).copied())
    }

    async fn set_open_timeout_minutes(&self, source: &str, minutes: u32) -> Result<()> {
        self.policies.lock().insert(source.to_string(), minutes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, status: Status, ts: u32) -> SensorStatus {
        SensorStatus {
            source: source.to_string(),
            status,
            timestamp: ts.to_string(),
            schema_version: "v1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let db = Database::open_in_memory().unwrap();
        db.append(&record("garage", Status::Open, 1)).await.unwrap();
        db.append(&record("garage", Status::Closed, 2)).await.unwrap();
        db.append(&record("front", Status::Open, 3)).await.unwrap();

        let page = db.query_statuses("garage", 1).unwrap();
        assert_eq!(page.pages, 1);
        assert_eq!(page.statuses.len(), 2);
        assert_eq!(page.statuses[0].status, Status::Closed);
        assert_eq!(page.statuses[0].schema_version, "v1");

        let all = db.query_statuses("ALL", 0).unwrap();
        assert_eq!(all.page, 1);
        assert_eq!(all.statuses.len(), 3);
        assert_eq!(all.statuses[0].source, "front");
        assert_eq!(db.status_count().unwrap(), 3);
    }

    #[test]
    fn test_paging() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..250 {
            db.append_status(&record("garage", Status::Open, i)).unwrap();
        }
        let first = db.query_statuses("garage", 1).unwrap();
        let last = db.query_statuses("garage", 3).unwrap();
        assert_eq!(first.pages, 3);
        assert_eq!(first.statuses.len(), 100);
        assert_eq!(first.statuses[0].timestamp, "249");
        assert_eq!(last.statuses.len(), 50);
    }

    #[test]
    fn test_unrecognized_status_round_trips() {
        let db = Database::open_in_memory().unwrap();
        db.append_status(&record("garage", Status::Other("AJAR".into()), 1))
            .unwrap();
        let page = db.query_statuses("garage", 1).unwrap();
        assert_eq!(page.statuses[0].status, Status::Other("AJAR".into()));
    }

    #[tokio::test]
    async fn test_policy_table() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.open_timeout_minutes("garage").await.unwrap(), None);
        db.set_open_timeout_minutes("garage", 10).await.unwrap();
        db.set_open_timeout_minutes("garage", 20).await.unwrap();
        assert_eq!(db.open_timeout_minutes("garage").await.unwrap(), Some(20));
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("audit.db"),
            ..DatabaseConfig::default()
        };
        let db = Database::open(&config).unwrap();
        db.append_status(&record("garage", Status::Open, 1)).unwrap();
        drop(db);

        let db = Database::open(&config).unwrap();
        assert_eq!(db.status_count().unwrap(), 1);
    }
}
