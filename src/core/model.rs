// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Records exchanged with sensors, the state store and the UI

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Physical state reported by a door sensor.
///
/// Values outside the known set are carried as [`Status::Other`] so a
/// misbehaving sensor never causes a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Open,
    Closed,
    Unknown,
    Other(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Status::Open => "OPEN",
            Status::Closed => "CLOSED",
            Status::Unknown => "UNKNOWN",
            Status::Other(s) => s,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Status::Other(_))
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        match s.as_str() {
            "OPEN" => Status::Open,
            "CLOSED" => Status::Closed,
            "UNKNOWN" => Status::Unknown,
            _ => Status::Other(s),
        }
    }
}

impl From<&str> for Status {
    fn from(s: &str) -> Self {
        Status::from(s.to_string())
    }
}

impl From<Status> for String {
    fn from(s: Status) -> Self {
        match s {
            Status::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known state of one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorStatus {
    pub source: String,
    pub status: Status,
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "version", default)]
    pub schema_version: String,
}

impl SensorStatus {
    pub fn new(source: &str, status: Status) -> Self {
        Self {
            source: source.to_string(),
            status,
            timestamp: now_unix(),
            schema_version: String::new(),
        }
    }

    /// Copy of this record with a new status, keeping the source
    pub fn with_status(&self, status: Status) -> Self {
        Self {
            source: self.source.clone(),
            status,
            timestamp: now_unix(),
            schema_version: self.schema_version.clone(),
        }
    }

    /// Re-stamp with the server's receipt time
    pub fn stamped(mut self) -> Self {
        self.timestamp = now_unix();
        self
    }
}

/// Origin of a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatKind {
    Sensor,
    #[serde(rename = "app", alias = "application")]
    Application,
}

impl fmt::Display for HeartbeatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatKind::Sensor => f.write_str("sensor"),
            HeartbeatKind::Application => f.write_str("app"),
        }
    }
}

/// Liveness pulse from a sensor agent or a companion application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "name")]
    pub identity: String,
    #[serde(rename = "type")]
    pub kind: HeartbeatKind,
    #[serde(rename = "version", default)]
    pub schema_version: String,
}

impl Heartbeat {
    pub fn sensor(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            kind: HeartbeatKind::Sensor,
            schema_version: String::new(),
        }
    }

    pub fn application(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            kind: HeartbeatKind::Application,
            schema_version: String::new(),
        }
    }
}

/// What the heartbeat key family stores per identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSeen {
    #[serde(flatten)]
    pub heartbeat: Heartbeat,
    pub timestamp: String,
}

/// Administrative arming toggle received over the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmingChange {
    pub source: String,
    pub armed: bool,
}

/// Administrative open-timeout override received over the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTimeoutChange {
    pub source: String,
    #[serde(rename = "openTimeoutMinutes")]
    pub open_timeout_minutes: u32,
}

/// Snapshot sent to newly connected UI clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorState {
    pub sensors: Vec<SensorStatus>,
    pub arming: HashMap<String, bool>,
}

pub(crate) fn now_unix() -> String {
    Utc::now().timestamp().to_string()
}
