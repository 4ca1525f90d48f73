//! Dimmer actor codec (Eltako FUD61 family), A5-38-08 command 2.
//!
//! The same layout is used in both directions: commands carry the target
//! brightness, status telegrams report the current one.

use super::relay::{SwitchState, TEACH_IN};
use super::{Eep, FieldDef, Profile, PropertyMap, Telegram, rorg};
use crate::error::{DecodeError, EncodeError};

pub const COMMAND_DIMMING: u8 = 0x02;

pub const EEP: Eep = Eep::new(rorg::BS4, 0x38, 0x08).with_command(COMMAND_DIMMING);

const FIELDS: &[FieldDef] = &[
    FieldDef::new("COM", 0, 8),
    FieldDef::new("EDIM", 8, 8),
    FieldDef::new("RMP", 16, 8),
    FieldDef::new("LRN", 28, 1),
    FieldDef::new("EDIMR", 29, 1),
    FieldDef::new("STR", 30, 1),
    FieldDef::new("SW", 31, 1),
];

pub const PROFILE: Profile = Profile {
    eep: EEP,
    payload_len: 4,
    fields: FIELDS,
};

/// Brightness used when switching on without a remembered level.
pub const DEFAULT_DIM_STATE: u8 = 100;

/// Fastest ramp the actor accepts (0 would select the actor's own default).
pub const DEFAULT_RAMP: u8 = 1;

/// `EDIMR` value for an absolute 0..255 brightness.
pub const RANGE_ABSOLUTE: u32 = 0;
/// `EDIMR` value for a relative 0..100 brightness.
pub const RANGE_RELATIVE: u32 = 1;

/// Dimming command or status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimmerAction {
    pub switch_state: SwitchState,
    /// Brightness in percent (0..=100).
    pub dim_state: u8,
    pub ramp: u8,
    pub store: bool,
    pub learn: bool,
}

impl DimmerAction {
    /// Switch on at `dim_state` percent, or off for 0.
    pub fn dim(dim_state: u8) -> Self {
        Self {
            switch_state: SwitchState::from_bool(dim_state > 0),
            dim_state,
            ramp: DEFAULT_RAMP,
            store: false,
            learn: false,
        }
    }

    pub fn off() -> Self {
        Self::dim(0)
    }

    pub fn learn() -> Self {
        Self {
            learn: true,
            ..Self::off()
        }
    }
}

/// Convert an absolute 0..255 brightness to percent:
/// `floor(absolute * 100 / 256 + 0.5)`, so 0 → 0, 128 → 50 and 255 → 100.
pub fn absolute_to_relative(absolute: u32) -> u8 {
    let relative = (f64::from(absolute) * 100.0 / 256.0 + 0.5).floor();
    relative.clamp(0.0, 100.0) as u8
}

/// Encode a dimming command. `switch_state` must agree with `dim_state`.
pub fn encode(action: &DimmerAction, sender: u32, destination: u32) -> Result<Telegram, EncodeError> {
    if action.learn {
        return Ok(Telegram::new(rorg::BS4, &TEACH_IN, sender, destination));
    }
    if action.dim_state > 100 {
        return Err(EncodeError::OutOfRange {
            field: "EDIM",
            value: f64::from(action.dim_state),
        });
    }
    if action.switch_state.is_on() != (action.dim_state > 0) {
        return Err(EncodeError::Inconsistent(format!(
            "switch_state {} does not match dim_state {}",
            action.switch_state, action.dim_state
        )));
    }

    let props = PropertyMap::new()
        .with("COM", u32::from(COMMAND_DIMMING))
        .with("EDIM", u32::from(action.dim_state))
        .with("RMP", u32::from(action.ramp))
        .with("LRN", 1)
        .with("EDIMR", RANGE_RELATIVE)
        .with("STR", u32::from(action.store))
        .with("SW", u32::from(action.switch_state.is_on()));
    PROFILE.encode(&props, sender, destination)
}

/// Decode a dimming command or status telegram.
pub fn decode(telegram: &Telegram) -> Result<DimmerAction, DecodeError> {
    if telegram.is_4bs_teach_in() {
        return Err(DecodeError::TeachIn);
    }
    let props = PROFILE.parse(telegram)?;

    let com = props.require("COM")?;
    if com != u32::from(COMMAND_DIMMING) {
        return Err(DecodeError::UnsupportedValue {
            field: "COM",
            value: com,
        });
    }

    let edim = props.require("EDIM")?;
    let dim_state = match props.require("EDIMR")? {
        RANGE_ABSOLUTE => absolute_to_relative(edim),
        _ if edim > 100 => {
            return Err(DecodeError::UnsupportedValue {
                field: "EDIM",
                value: edim,
            });
        }
        _ => edim as u8,
    };

    Ok(DimmerAction {
        switch_state: SwitchState::from_bool(props.require("SW")? == 1),
        dim_state,
        ramp: props.require("RMP")? as u8,
        store: props.require("STR")? == 1,
        learn: false,
    })
}
