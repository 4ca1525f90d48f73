//! Device state machines and the seams the bridge drives them through.
//!
//! Devices never touch the network. Every callback gets a [`DeviceContext`]
//! carrying the current time and the radio facts; the device leaves MQTT
//! publications, outgoing telegrams and timer requests in it and the bridge
//! delivers them afterwards.

pub mod common;
pub mod dimmer;
pub mod opening;
pub mod registry;
pub mod relay;
pub mod scene;
pub mod shutter;
pub mod two_channel;

use crate::eep::Telegram;
use crate::error::Result;
use crate::transport::{MqttMessage, RadioContext};
use chrono::{DateTime, Local};
use rumqttc::QoS;
use std::time::Duration;

pub use registry::DeviceRegistry;

/// One outgoing MQTT message.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// Device-chosen id of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u32);

/// Per-call scratch space between a device and the bridge.
#[derive(Debug)]
pub struct DeviceContext {
    pub now: DateTime<Local>,
    pub radio: RadioContext,
    pub publications: Vec<Publication>,
    pub telegrams: Vec<Telegram>,
    pub timers: Vec<(Duration, TimerToken)>,
}

impl DeviceContext {
    pub fn new(now: DateTime<Local>, radio: RadioContext) -> Self {
        Self {
            now,
            radio,
            publications: Vec::new(),
            telegrams: Vec::new(),
            timers: Vec::new(),
        }
    }

    pub fn publish(&mut self, topic: impl Into<String>, payload: impl Into<String>, qos: QoS, retain: bool) {
        self.publications.push(Publication {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        });
    }

    pub fn send(&mut self, telegram: Telegram) {
        self.telegrams.push(telegram);
    }

    /// Ask for [`Device::on_timer`] to be called after `delay`.
    pub fn schedule(&mut self, delay: Duration, token: TimerToken) {
        self.timers.push((delay, token));
    }
}

/// Reacts to radio telegrams.
pub trait EnoceanHandler {
    /// Sender ids this device wants to see telegrams from.
    fn enocean_ids(&self) -> Vec<u32>;

    fn process_enocean_message(&mut self, telegram: &Telegram, ctx: &mut DeviceContext) -> Result<()>;
}

/// Reacts to MQTT commands.
pub trait MqttHandler {
    /// Topics this device subscribes to.
    fn mqtt_topics(&self) -> Vec<String>;

    fn process_mqtt_message(&mut self, message: &MqttMessage, ctx: &mut DeviceContext) -> Result<()>;
}

/// Called about once per second.
pub trait CyclicTask {
    fn check_cyclic_tasks(&mut self, ctx: &mut DeviceContext) -> Result<()>;
}

/// A configured device as seen by the bridge.
pub trait Device: EnoceanHandler + MqttHandler + CyclicTask + Send {
    fn name(&self) -> &str;

    /// Restore persisted state and start watchdogs.
    fn open(&mut self, ctx: &mut DeviceContext) -> Result<()>;

    /// Publish the last will and flush storage.
    fn close(&mut self, ctx: &mut DeviceContext) -> Result<()>;

    fn on_timer(&mut self, _token: TimerToken, _ctx: &mut DeviceContext) -> Result<()> {
        Ok(())
    }

    /// Write pending storage changes.
    fn flush_storage(&mut self) {}
}
