// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Event bus between the MQTT client and the engine

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use super::model::{ArmingChange, Heartbeat, OpenTimeoutChange, SensorStatus};
use crate::error::{Error, Result};

pub const SENSOR_STATUS_TOPIC: &str = "sensor/status";
pub const SENSOR_HEARTBEAT_TOPIC: &str = "sensor/heartbeat";
pub const SENSOR_ARMING_TOPIC: &str = "sensor/arming";
pub const SENSOR_CONFIG_TOPIC: &str = "sensor/config";
pub const HA_SENSOR_STATUS_TOPIC: &str = "ha/sensor/status";
pub const HA_SENSOR_ARMING_TOPIC: &str = "ha/sensor/arming";

/// Topics the engine consumes
pub const INBOUND_TOPICS: [&str; 4] = [
    SENSOR_STATUS_TOPIC,
    SENSOR_HEARTBEAT_TOPIC,
    SENSOR_ARMING_TOPIC,
    SENSOR_CONFIG_TOPIC,
];

/// Raw message as delivered by the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub id: u64,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Decoded inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Status(SensorStatus),
    Heartbeat(Heartbeat),
    Arming(ArmingChange),
    OpenTimeout(OpenTimeoutChange),
}

impl InboundEvent {
    pub fn decode(message: &BusMessage) -> Result<Self> {
        let topic = message.topic.as_str();
        let event = match topic {
            SENSOR_STATUS_TOPIC => {
                let status: SensorStatus = parse(topic, &message.payload)?;
                require(topic, "source", &status.source)?;
                InboundEvent::Status(status)
            }
            SENSOR_HEARTBEAT_TOPIC => {
                let heartbeat: Heartbeat = parse(topic, &message.payload)?;
                require(topic, "name", &heartbeat.identity)?;
                InboundEvent::Heartbeat(heartbeat)
            }
            SENSOR_ARMING_TOPIC => {
                let change: ArmingChange = parse(topic, &message.payload)?;
                require(topic, "source", &change.source)?;
                InboundEvent::Arming(change)
            }
            SENSOR_CONFIG_TOPIC => {
                let change: OpenTimeoutChange = parse(topic, &message.payload)?;
                require(topic, "source", &change.source)?;
                InboundEvent::OpenTimeout(change)
            }
            other => return Err(Error::decode(other, "not an inbound topic")),
        };
        Ok(event)
    }

    /// Sensor or identity the event belongs to
    pub fn key(&self) -> &str {
        match self {
            InboundEvent::Status(status) => &status.source,
            InboundEvent::Heartbeat(heartbeat) => &heartbeat.identity,
            InboundEvent::Arming(change) => &change.source,
            InboundEvent::OpenTimeout(change) => &change.source,
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(topic: &str, payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| {
        let preview = String::from_utf8_lossy(&payload[..payload.len().min(256)]);
        Error::decode(topic, format!("{} (payload: {})", e, preview))
    })
}

fn require(topic: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::decode(topic, format!("empty '{}'", field)));
    }
    Ok(())
}

/// In-process side of the bus: the MQTT client (or a test) publishes here
/// and the engine drains the receiver.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<BusMessage>,
    counter: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                counter: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Forward a raw payload. Returns false once the engine has gone away.
    pub async fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> bool {
        let message = BusMessage {
            id: self.counter.fetch_add(1, Ordering::Relaxed),
            topic: topic.to_string(),
            payload,
        };
        if self.tx.send(message).await.is_err() {
            warn!("Event bus closed, dropping message on {}", topic);
            return false;
        }
        true
    }

    pub async fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<bool> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(self.publish_raw(topic, bytes).await)
    }

    pub async fn publish_status(&self, status: &SensorStatus) -> Result<bool> {
        self.publish(SENSOR_STATUS_TOPIC, status).await
    }

    pub async fn publish_heartbeat(&self, heartbeat: &Heartbeat) -> Result<bool> {
        self.publish(SENSOR_HEARTBEAT_TOPIC, heartbeat).await
    }

    pub fn published(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
