//! Connections to the outside world: the MQTT broker and the EnOcean radio.

pub mod mqtt;
pub mod radio;

use crate::eep::Telegram;
use crate::error::Result;

pub use mqtt::{MqttClient, MqttEvent, MqttMessage};
pub use radio::MqttRadioTransport;

/// Facts about the radio adapter that devices need when sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioContext {
    /// Base id of the gateway; default sender of outgoing telegrams.
    pub base_id: u32,
}

/// A source and sink of EnOcean telegrams.
pub trait EnoceanTransport: Send {
    /// Start the transport and report the adapter's base id.
    fn open(&mut self) -> Result<RadioContext>;

    /// Hand at most `max` pending telegrams to `on_telegram`. Returns how
    /// many were delivered.
    fn receive(&mut self, max: usize, on_telegram: &mut dyn FnMut(Telegram)) -> Result<usize>;

    fn send(&mut self, telegram: &Telegram) -> Result<()>;

    fn close(&mut self);
}
