//! MQTT client wrapper shared by the devices and the radio transport.

use crate::config::{MqttConfig, qos_from_u8};
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the outgoing request queue inside rumqttc.
const REQUEST_CAPACITY: usize = 256;

/// Message received from MQTT broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

impl MqttMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// What the event loop reports to the main loop.
#[derive(Debug, Clone)]
pub enum MqttEvent {
    Connected,
    Disconnected(String),
    Message(MqttMessage),
}

/// MQTT client for the bridge connection.
pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
}

impl MqttClient {
    /// Create a new MQTT client from configuration.
    pub fn new(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        // Set credentials if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        if let Some(will) = &config.last_will {
            options.set_last_will(LastWill::new(
                &will.topic,
                will.payload.as_bytes().to_vec(),
                qos_from_u8(will.qos),
                will.retain,
            ));
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Self { client, event_loop }
    }

    /// Run the MQTT event loop and forward events to the provided channel.
    ///
    /// rumqttc reconnects on the next poll after an error, so this only
    /// returns once the receiving side is gone.
    pub async fn run(mut self, tx: mpsc::Sender<MqttEvent>) {
        info!("Starting MQTT event loop");

        loop {
            let event = match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Connected to MQTT broker ({:?})", ack.code);
                    MqttEvent::Connected
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = publish.topic.clone();
                    let payload = match String::from_utf8(publish.payload.to_vec()) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("Invalid UTF-8 in MQTT payload on {}: {}", topic, e);
                            continue;
                        }
                    };

                    debug!("Received MQTT message on {}: {}", topic, payload);
                    MqttEvent::Message(MqttMessage { topic, payload })
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("MQTT connection error: {:?}", e);
                    if tx.send(MqttEvent::Disconnected(e.to_string())).await.is_err() {
                        break;
                    }
                    // Wait before reconnecting
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if tx.send(event).await.is_err() {
                debug!("MQTT event channel closed, stopping event loop");
                break;
            }
        }
    }

    /// Get a clone of the async client for publishing from other tasks.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }
}

/// Queue a publish without waiting. Errors are logged.
pub fn publish(client: &AsyncClient, topic: &str, payload: &str, qos: QoS, retain: bool) {
    debug!("Publishing to {}: {}", topic, payload);
    if let Err(e) = client.try_publish(topic, qos, retain, payload.as_bytes().to_vec()) {
        error!("Failed to publish to {}: {}", topic, e);
    }
}

/// Queue subscriptions for all `topics`. Errors are logged.
pub fn subscribe_all(client: &AsyncClient, topics: &[String]) {
    for topic in topics {
        info!("Subscribing to MQTT topic: {}", topic);
        if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
            error!("Failed to subscribe to {}: {}", topic, e);
        }
    }
}
