//! Two-channel switch actor codec (Eltako FSR14-2x style).
//!
//! Both directions use rocker telegrams. Channel 1 answers to ROCK1 (on) and
//! ROCK0 (off), channel 2 to ROCK3 (on) and ROCK2 (off).

use super::relay::SwitchState;
use super::rocker::{self, RockerAction, RockerButton, RockerPress};
use super::Telegram;
use crate::error::{DecodeError, EncodeError};

pub const CHANNELS: u8 = 2;

/// Switch command or status for one channel (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAction {
    pub channel: u8,
    pub switch_state: SwitchState,
}

fn button_for(action: &ChannelAction) -> Result<RockerButton, EncodeError> {
    match (action.channel, action.switch_state) {
        (1, SwitchState::On) => Ok(RockerButton::Rock1),
        (1, SwitchState::Off) => Ok(RockerButton::Rock0),
        (2, SwitchState::On) => Ok(RockerButton::Rock3),
        (2, SwitchState::Off) => Ok(RockerButton::Rock2),
        (channel, _) => Err(EncodeError::OutOfRange {
            field: "channel",
            value: f64::from(channel),
        }),
    }
}

/// Encode the button press for a channel command. The release telegram is
/// sent separately via [`encode_release`].
pub fn encode(action: &ChannelAction, sender: u32, destination: u32) -> Result<Telegram, EncodeError> {
    let button = button_for(action)?;
    rocker::encode(&RockerAction::pressed(button), sender, destination)
}

pub fn encode_release(sender: u32, destination: u32) -> Result<Telegram, EncodeError> {
    rocker::encode(&RockerAction::released(), sender, destination)
}

/// Decode a channel status (or a sniffed channel command).
pub fn decode(telegram: &Telegram) -> Result<ChannelAction, DecodeError> {
    let action = rocker::decode(telegram)?;
    if action.press != RockerPress::Pressed {
        return Err(DecodeError::NoState("rocker release"));
    }
    let (channel, switch_state) = match action.button {
        Some(RockerButton::Rock1) => (1, SwitchState::On),
        Some(RockerButton::Rock0) => (1, SwitchState::Off),
        Some(RockerButton::Rock3) => (2, SwitchState::On),
        Some(RockerButton::Rock2) => (2, SwitchState::Off),
        None => return Err(DecodeError::MissingField("R1")),
    };
    Ok(ChannelAction {
        channel,
        switch_state,
    })
}
