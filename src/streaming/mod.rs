// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Streaming module - MQTT bus client and WebSocket live updates

mod mqtt;
mod websocket;

pub use mqtt::*;
pub use websocket::*;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::event_bus::{
    HA_SENSOR_ARMING_TOPIC, HA_SENSOR_STATUS_TOPIC, SENSOR_ARMING_TOPIC, SENSOR_STATUS_TOPIC,
};
use crate::error::Result;

/// MQTT bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: format!("doorwatch-{}", uuid::Uuid::new_v4()),
            username: None,
            password: None,
            use_tls: false,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

/// Live update configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Enable WebSocket server
    pub websocket_enabled: bool,
    pub websocket_port: u16,
    pub websocket_max_clients: usize,

    /// Republish status and arming changes on the `ha/` topics
    pub ha_republish: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            websocket_enabled: true,
            websocket_port: 8765,
            websocket_max_clients: 32,
            ha_republish: true,
        }
    }
}

/// Best-effort fan-out to live consumers
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, channel: &str, payload: &serde_json::Value) -> Result<()>;
}

/// Streaming manager: fans each update out to WebSocket clients and the
/// home-automation topics on the bus
pub struct StreamingManager {
    mqtt_client: Option<Arc<MqttClient>>,
    websocket_server: Option<Arc<WebSocketServer>>,
}

impl StreamingManager {
    pub fn new(
        mqtt_client: Option<Arc<MqttClient>>,
        websocket_server: Option<Arc<WebSocketServer>>,
    ) -> Self {
        Self {
            mqtt_client,
            websocket_server,
        }
    }

    /// A manager with no outputs
    pub fn disabled() -> Self {
        Self::new(None, None)
    }
}

fn ha_topic(channel: &str) -> Option<&'static str> {
    match channel {
        SENSOR_STATUS_TOPIC => Some(HA_SENSOR_STATUS_TOPIC),
        SENSOR_ARMING_TOPIC => Some(HA_SENSOR_ARMING_TOPIC),
        _ => None,
    }
}

#[async_trait]
impl Broadcaster for StreamingManager {
    async fn publish(&self, channel: &str, payload: &serde_json::Value) -> Result<()> {
        if let Some(ref ws) = self.websocket_server {
            ws.broadcast(channel, payload)?;
        }

        if let (Some(mqtt), Some(topic)) = (&self.mqtt_client, ha_topic(channel)) {
            if let Err(e) = mqtt.publish(topic, payload).await {
                warn!("Home-automation republish on {} failed: {}", topic, e);
            }
        }

        Ok(())
    }
}

/// Records every publish; used by tests and the headless demo
#[derive(Default)]
pub struct RecordingBroadcaster {
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn publish(&self, channel: &str, payload: &serde_json::Value) -> Result<()> {
        self.published
            .lock()
            .push((channel.to_string(), payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ha_topic_mapping() {
        assert_eq!(ha_topic(SENSOR_STATUS_TOPIC), Some(HA_SENSOR_STATUS_TOPIC));
        assert_eq!(ha_topic(SENSOR_ARMING_TOPIC), Some(HA_SENSOR_ARMING_TOPIC));
        assert_eq!(ha_topic("sensor/heartbeat"), None);
    }

    #[tokio::test]
    async fn test_disabled_manager_accepts_publish() {
        let manager = StreamingManager::disabled();
        let payload = serde_json::json!({"source": "garage", "status": "OPEN"});
        assert!(manager.publish(SENSOR_STATUS_TOPIC, &payload).await.is_ok());
    }

    #[tokio::test]
    async fn test_websocket_fanout_without_clients() {
        let ws = Arc::new(WebSocketServer::new(0, 4, None));
        let manager = StreamingManager::new(None, Some(ws.clone()));
        let payload = serde_json::json!({"source": "garage"});
        assert!(manager.publish(SENSOR_STATUS_TOPIC, &payload).await.is_ok());
        assert_eq!(ws.client_count().await, 0);
    }
}
