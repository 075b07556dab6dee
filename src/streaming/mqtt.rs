// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! MQTT client: feeds inbound sensor topics into the event bus and
//! republishes updates for home automation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::BusConfig;
use crate::core::event_bus::{EventBus, INBOUND_TOPICS};
use crate::error::Result;

/// MQTT client wrapper
pub struct MqttClient {
    client: AsyncClient,
    config: BusConfig,
    connected: Arc<AtomicBool>,
    eventloop: JoinHandle<()>,
}

impl MqttClient {
    /// Connect to the broker and forward every inbound publish into `bus`.
    ///
    /// Subscriptions to the inbound topics are (re)issued on every ConnAck so
    /// a broker restart does not silently stop ingest.
    pub fn new(config: &BusConfig, bus: EventBus) -> Result<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        if config.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        let connected = Arc::new(AtomicBool::new(false));

        let task_client = client.clone();
        let task_connected = connected.clone();
        let reconnect_delay = Duration::from_secs(config.reconnect_delay_secs);

        let eventloop = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                        task_connected.store(true, Ordering::SeqCst);
                        for topic in INBOUND_TOPICS {
                            if let Err(e) = task_client.try_subscribe(topic, QoS::AtLeastOnce) {
                                error!("MQTT subscribe to {} failed: {}", topic, e);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        debug!("MQTT received on {} ({} bytes)", msg.topic, msg.payload.len());
                        if !bus.publish_raw(&msg.topic, msg.payload.to_vec()).await {
                            info!("Event bus closed, stopping MQTT event loop");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        task_connected.store(false, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        task_connected.store(false, Ordering::SeqCst);
                        warn!("MQTT error: {:?}", e);
                        tokio::time::sleep(reconnect_delay).await;
                    }
                }
            }
        });

        info!("MQTT client initialized for {}:{}", config.broker, config.port);

        Ok(Self {
            client,
            config: config.clone(),
            connected,
            eventloop,
        })
    }

    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<()> {
        let json = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, json)
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        self.connected.store(false, Ordering::SeqCst);
        self.eventloop.abort();
        info!("MQTT client for {} disconnected", self.config.broker);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.eventloop.abort();
    }
}
