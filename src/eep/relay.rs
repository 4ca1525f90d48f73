//! Relay actor codec (Eltako FSR61 family).
//!
//! Commands go out as A5-38-08 command 1 ("switching"); the actor answers
//! with rocker telegrams (ROCK3 = on, ROCK2 = off).

use super::rocker::{self, RockerButton, RockerPress};
use super::{Eep, FieldDef, Profile, PropertyMap, Telegram, rorg};
use crate::error::{DecodeError, EncodeError};
use serde::{Deserialize, Serialize};
use strum::Display;

pub const COMMAND_SWITCHING: u8 = 0x01;

pub const EEP: Eep = Eep::new(rorg::BS4, 0x38, 0x08).with_command(COMMAND_SWITCHING);

const FIELDS: &[FieldDef] = &[
    FieldDef::new("COM", 0, 8),
    FieldDef::new("TIM", 8, 16),
    FieldDef::new("LRN", 28, 1),
    FieldDef::new("LCK", 29, 1),
    FieldDef::new("DEL", 30, 1),
    FieldDef::new("SW", 31, 1),
];

pub const PROFILE: Profile = Profile {
    eep: EEP,
    payload_len: 4,
    fields: FIELDS,
};

/// Teach-in telegram accepted by Eltako switching/dimming actors.
pub const TEACH_IN: [u8; 4] = [0xE0, 0x40, 0x0D, 0x80];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn from_bool(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn inverted(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

/// Outgoing relay command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayAction {
    pub switch_state: SwitchState,
    pub learn: bool,
}

impl RelayAction {
    pub fn switch(state: SwitchState) -> Self {
        Self {
            switch_state: state,
            learn: false,
        }
    }

    pub fn learn() -> Self {
        Self {
            switch_state: SwitchState::Off,
            learn: true,
        }
    }
}

/// State reported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    pub switch_state: SwitchState,
}

/// Encode a switching command (or the teach-in telegram).
pub fn encode(action: &RelayAction, sender: u32, destination: u32) -> Result<Telegram, EncodeError> {
    if action.learn {
        return Ok(Telegram::new(rorg::BS4, &TEACH_IN, sender, destination));
    }

    let props = PropertyMap::new()
        .with("COM", u32::from(COMMAND_SWITCHING))
        .with("LRN", 1)
        .with("SW", u32::from(action.switch_state.is_on()));
    PROFILE.encode(&props, sender, destination)
}

/// Decode either an actor status (rocker) telegram or a switching command.
pub fn decode(telegram: &Telegram) -> Result<RelayStatus, DecodeError> {
    match telegram.rorg() {
        Some(rorg::RPS) => decode_status(telegram),
        Some(rorg::BS4) => decode_command(telegram).map(|action| RelayStatus {
            switch_state: action.switch_state,
        }),
        other => Err(DecodeError::WrongRorg {
            expected: rorg::RPS,
            actual: other.unwrap_or(0),
        }),
    }
}

fn decode_status(telegram: &Telegram) -> Result<RelayStatus, DecodeError> {
    let action = rocker::decode(telegram)?;
    if action.press != RockerPress::Pressed {
        return Err(DecodeError::NoState("rocker release"));
    }
    match action.button {
        Some(RockerButton::Rock3) => Ok(RelayStatus {
            switch_state: SwitchState::On,
        }),
        Some(RockerButton::Rock2) => Ok(RelayStatus {
            switch_state: SwitchState::Off,
        }),
        other => Err(DecodeError::UnsupportedValue {
            field: "R1",
            value: other.map(|b| b as u32).unwrap_or(0),
        }),
    }
}

/// Decode a 4BS switching command.
pub fn decode_command(telegram: &Telegram) -> Result<RelayAction, DecodeError> {
    if telegram.is_4bs_teach_in() {
        return Err(DecodeError::TeachIn);
    }
    let props = PROFILE.parse(telegram)?;
    let com = props.require("COM")?;
    if com != u32::from(COMMAND_SWITCHING) {
        return Err(DecodeError::UnsupportedValue {
            field: "COM",
            value: com,
        });
    }
    Ok(RelayAction::switch(SwitchState::from_bool(
        props.require("SW")? == 1,
    )))
}
