//! Building blocks shared by all device state machines.

use super::DeviceContext;
use crate::config::DeviceConfig;
use crate::error::ConfigError;
use crate::storage::Storage;
use chrono::{DateTime, Local, SecondsFormat, TimeDelta};
use log::{debug, info};
use rand::Rng;
use rumqttc::QoS;
use serde_json::{Map, Value};
use std::time::Duration;

/// Upper bound of the random extension applied to refresh intervals.
const REFRESH_JITTER: f64 = 0.1;

/// MQTT side of a device.
#[derive(Debug, Clone)]
pub struct MqttBinding {
    pub channel_state: String,
    pub channel_cmd: Option<String>,
    pub qos: QoS,
    pub retain: bool,
    pub last_will: Option<String>,
}

impl MqttBinding {
    pub fn from_config(config: &DeviceConfig, require_cmd: bool) -> Result<Self, ConfigError> {
        let channel_cmd = if require_cmd {
            Some(config.require_cmd_channel()?)
        } else {
            config.mqtt_channel_cmd.clone()
        };
        Ok(Self {
            channel_state: config.require_state_channel()?,
            channel_cmd,
            qos: config.qos()?,
            retain: config.mqtt_retain,
            last_will: config.mqtt_last_will.clone(),
        })
    }

    pub fn topics(&self) -> Vec<String> {
        self.channel_cmd.iter().cloned().collect()
    }

    pub fn is_command(&self, topic: &str) -> bool {
        self.channel_cmd.as_deref() == Some(topic)
    }

    pub fn publish(&self, ctx: &mut DeviceContext, payload: impl Into<String>) {
        ctx.publish(&self.channel_state, payload, self.qos, self.retain);
    }

    pub fn publish_to(&self, ctx: &mut DeviceContext, topic: &str, payload: impl Into<String>) {
        ctx.publish(topic, payload, self.qos, self.retain);
    }

    pub fn publish_json(&self, ctx: &mut DeviceContext, value: &Value) {
        self.publish(ctx, value.to_string());
    }

    /// Publish the configured last will on the state channel. Returns false
    /// if none is configured.
    pub fn publish_last_will(&self, ctx: &mut DeviceContext) -> bool {
        let Some(will) = &self.last_will else {
            return false;
        };
        self.publish(ctx, will.clone());
        true
    }
}

/// EnOcean side of a device.
#[derive(Debug, Clone, Copy)]
pub struct EnoceanBinding {
    /// Id of the physical device.
    pub target: u32,
    /// Sender id for outgoing telegrams; the gateway base id when unset.
    pub sender: Option<u32>,
}

impl EnoceanBinding {
    pub fn from_config(config: &DeviceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            target: config.require_target()?,
            sender: config.enocean_sender,
        })
    }

    pub fn sender(&self, ctx: &DeviceContext) -> u32 {
        self.sender.unwrap_or(ctx.radio.base_id)
    }
}

/// Storage configured for a device.
pub fn storage_from_config(config: &DeviceConfig) -> Storage {
    Storage::new(config.storage_file.clone(), config.storage_max_age())
}

/// Detects devices that stopped reporting.
///
/// Fires once when nothing was received for the timeout, then again only
/// every `reannounce` while the silence lasts. A received telegram resets it.
#[derive(Debug, Clone)]
pub struct OfflineWatch {
    timeout: Option<Duration>,
    reannounce: Option<Duration>,
    last_seen: Option<DateTime<Local>>,
    announced_at: Option<DateTime<Local>>,
}

impl OfflineWatch {
    pub fn new(timeout: Option<Duration>, reannounce: Option<Duration>) -> Self {
        Self {
            timeout,
            reannounce,
            last_seen: None,
            announced_at: None,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.offline_timeout(), config.offline_reannounce())
    }

    /// Start the clock; a device that never reports goes offline too.
    pub fn start(&mut self, now: DateTime<Local>) {
        self.last_seen.get_or_insert(now);
    }

    /// A telegram arrived from the device.
    pub fn seen(&mut self, now: DateTime<Local>) {
        self.last_seen = Some(now);
        self.announced_at = None;
    }

    #[cfg(test)]
    pub fn is_offline(&self) -> bool {
        self.announced_at.is_some()
    }

    /// True when the offline state should be announced now.
    pub fn check(&mut self, now: DateTime<Local>) -> bool {
        let (Some(timeout), Some(last_seen)) = (self.timeout, self.last_seen) else {
            return false;
        };
        if elapsed(last_seen, now) < timeout {
            return false;
        }
        match self.announced_at {
            None => {
                self.announced_at = Some(now);
                true
            }
            Some(at) => match self.reannounce {
                Some(interval) if elapsed(at, now) >= interval => {
                    self.announced_at = Some(now);
                    true
                }
                _ => false,
            },
        }
    }
}

/// Periodic refresh with a small random extension, so devices configured
/// with the same interval do not all fire together.
#[derive(Debug, Clone)]
pub struct RefreshTimer {
    interval: Option<Duration>,
    next_due: Option<DateTime<Local>>,
}

impl RefreshTimer {
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.refresh_interval())
    }

    pub fn next_due(&self) -> Option<DateTime<Local>> {
        self.next_due
    }

    pub fn schedule(&mut self, now: DateTime<Local>) {
        let Some(interval) = self.interval else {
            return;
        };
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..=REFRESH_JITTER);
        let delay = interval.mul_f64(factor);
        self.next_due = TimeDelta::from_std(delay).ok().map(|delta| now + delta);
        debug!("Next refresh in {:.1}s", delay.as_secs_f64());
    }

    /// True when due; the next run is scheduled at the same time.
    pub fn due(&mut self, now: DateTime<Local>) -> bool {
        match self.next_due {
            Some(at) if at <= now => {
                self.schedule(now);
                true
            }
            _ => false,
        }
    }
}

/// Handles the offline watch in a cyclic task. Returns true if the last
/// will was published.
pub fn check_offline(
    name: &str,
    watch: &mut OfflineWatch,
    mqtt: &MqttBinding,
    ctx: &mut DeviceContext,
) -> bool {
    if !watch.check(ctx.now) {
        return false;
    }
    info!("[{}] No telegram received within the offline timeout", name);
    mqtt.publish_last_will(ctx)
}

/// Non-negative duration between two instants.
pub fn elapsed(from: DateTime<Local>, to: DateTime<Local>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

pub fn format_timestamp(time: DateTime<Local>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Start of a status message: device name and timestamp, plus the RSSI of
/// the last telegram when known.
pub fn status_message(name: &str, now: DateTime<Local>, rssi: Option<i32>) -> Map<String, Value> {
    let mut message = Map::new();
    message.insert("device".into(), Value::from(name));
    message.insert("timestamp".into(), Value::from(format_timestamp(now)));
    if let Some(rssi) = rssi {
        message.insert("rssi".into(), Value::from(rssi));
    }
    message
}
