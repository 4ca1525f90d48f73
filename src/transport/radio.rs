//! EnOcean radio reached through a gateway that relays telegrams over MQTT.
//!
//! The gateway publishes every received telegram as a JSON object on
//! `rx_topic` and transmits objects published on `tx_topic`:
//!
//! ```json
//! {"packet_type": "radio", "data": "f670", "status": 48,
//!  "sender": "0581A2C3", "destination": "FFFFFFFF", "rssi": -64}
//! ```
//!
//! `data` is the hex encoded rorg plus payload.

use super::mqtt;
use super::{EnoceanTransport, RadioContext};
use crate::config::EnoceanConfig;
use crate::eep::{BROADCAST_ID, PacketType, Telegram, parse_id};
use crate::error::{BridgeError, Result};
use log::{debug, info, warn};
use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Telegrams kept while the main loop is busy; older ones are dropped.
const INBOX_LIMIT: usize = 1024;

/// JSON form of a telegram on the gateway topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramMessage {
    #[serde(default)]
    pub packet_type: PacketType,
    pub data: String,
    #[serde(default)]
    pub status: u8,
    pub sender: String,
    #[serde(default = "broadcast")]
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
}

fn broadcast() -> String {
    format!("{BROADCAST_ID:08X}")
}

impl From<&Telegram> for TelegramMessage {
    fn from(telegram: &Telegram) -> Self {
        Self {
            packet_type: telegram.packet_type,
            data: hex::encode(&telegram.data),
            status: telegram.status,
            sender: format!("{:08X}", telegram.sender),
            destination: format!("{:08X}", telegram.destination),
            rssi: telegram.rssi,
        }
    }
}

impl TryFrom<TelegramMessage> for Telegram {
    type Error = BridgeError;

    fn try_from(message: TelegramMessage) -> Result<Self> {
        let data = hex::decode(message.data.trim())
            .map_err(|e| BridgeError::Transport(format!("bad telegram data: {e}")))?;
        if data.is_empty() {
            return Err(BridgeError::Transport("empty telegram data".into()));
        }
        let sender = parse_id(&message.sender)
            .ok_or_else(|| BridgeError::Transport(format!("bad sender '{}'", message.sender)))?;
        let destination = parse_id(&message.destination).ok_or_else(|| {
            BridgeError::Transport(format!("bad destination '{}'", message.destination))
        })?;
        Ok(Telegram {
            packet_type: message.packet_type,
            data,
            status: message.status,
            sender,
            destination,
            rssi: message.rssi,
        })
    }
}

/// Radio transport bound to the gateway's MQTT topics.
pub struct MqttRadioTransport {
    client: AsyncClient,
    tx_topic: String,
    rx_topic: String,
    base_id: u32,
    inbox: VecDeque<Telegram>,
    open: bool,
}

impl MqttRadioTransport {
    pub fn new(client: AsyncClient, config: &EnoceanConfig) -> Self {
        Self {
            client,
            tx_topic: config.tx_topic.clone(),
            rx_topic: config.rx_topic.clone(),
            base_id: config.base_id,
            inbox: VecDeque::new(),
            open: false,
        }
    }

    pub fn rx_topic(&self) -> &str {
        &self.rx_topic
    }

    /// Queue a gateway message received on the rx topic.
    pub fn ingest(&mut self, payload: &str) {
        let telegram = match serde_json::from_str::<TelegramMessage>(payload)
            .map_err(BridgeError::from)
            .and_then(Telegram::try_from)
        {
            Ok(telegram) => telegram,
            Err(e) => {
                warn!("Dropping unreadable gateway message: {} ({})", e, payload);
                return;
            }
        };
        if self.inbox.len() >= INBOX_LIMIT {
            warn!("Radio inbox full, dropping oldest telegram");
            self.inbox.pop_front();
        }
        self.inbox.push_back(telegram);
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }
}

impl EnoceanTransport for MqttRadioTransport {
    fn open(&mut self) -> Result<RadioContext> {
        self.open = true;
        info!(
            "Radio gateway on {} / {}, base id {:08X}",
            self.rx_topic, self.tx_topic, self.base_id
        );
        Ok(RadioContext {
            base_id: self.base_id,
        })
    }

    fn receive(&mut self, max: usize, on_telegram: &mut dyn FnMut(Telegram)) -> Result<usize> {
        let mut delivered = 0;
        while delivered < max {
            let Some(telegram) = self.inbox.pop_front() else {
                break;
            };
            debug!("Radio rx: {}", telegram);
            on_telegram(telegram);
            delivered += 1;
        }
        Ok(delivered)
    }

    fn send(&mut self, telegram: &Telegram) -> Result<()> {
        if !self.open {
            return Err(BridgeError::Transport("radio transport is closed".into()));
        }
        let payload = serde_json::to_string(&TelegramMessage::from(telegram))?;
        debug!("Radio tx: {}", telegram);
        mqtt::publish(&self.client, &self.tx_topic, &payload, QoS::AtLeastOnce, false);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        if !self.inbox.is_empty() {
            debug!("Discarding {} unprocessed telegrams", self.inbox.len());
            self.inbox.clear();
        }
    }
}
