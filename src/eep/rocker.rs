//! Rocker switch telegrams (F6-02-01 / F6-02-02).
//!
//! Physical wall switches send these, and Eltako actors reuse them as
//! status messages (`0x70` = ROCK3 pressed, `0x50` = ROCK2 pressed).

use super::{Eep, FieldDef, Profile, PropertyMap, Telegram, rorg};
use crate::error::{DecodeError, EncodeError};
use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

pub const EEP: Eep = Eep::new(rorg::RPS, 0x02, 0x02);

const FIELDS: &[FieldDef] = &[
    FieldDef::new("R1", 0, 3),
    FieldDef::new("EB", 3, 1),
    FieldDef::new("R2", 4, 3),
    FieldDef::new("SA", 7, 1),
];

pub const PROFILE: Profile = Profile {
    eep: EEP,
    payload_len: 1,
    fields: FIELDS,
};

/// Status byte bit: T21 (PTM2xx module).
pub const STATUS_T21: u8 = 0x20;
/// Status byte bit: N-message (a button is pressed).
pub const STATUS_NU: u8 = 0x10;

/// Rocker button, numbered as in the EEP (AI, A0, BI, B0).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, Serialize, Deserialize,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RockerButton {
    Rock0 = 0,
    Rock1 = 1,
    Rock2 = 2,
    Rock3 = 3,
}

/// Whether the telegram reports a press or the release of all buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RockerPress {
    Pressed,
    Released,
}

/// Decoded rocker telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RockerAction {
    pub press: RockerPress,
    pub button: Option<RockerButton>,
    pub second_button: Option<RockerButton>,
}

impl RockerAction {
    pub fn pressed(button: RockerButton) -> Self {
        Self {
            press: RockerPress::Pressed,
            button: Some(button),
            second_button: None,
        }
    }

    pub fn released() -> Self {
        Self {
            press: RockerPress::Released,
            button: None,
            second_button: None,
        }
    }

    pub fn is_pressed(&self, button: RockerButton) -> bool {
        self.press == RockerPress::Pressed
            && (self.button == Some(button) || self.second_button == Some(button))
    }
}

/// Decode a rocker telegram.
pub fn decode(telegram: &Telegram) -> Result<RockerAction, DecodeError> {
    let props = PROFILE.parse(telegram)?;

    if telegram.status & STATUS_NU == 0 {
        // U-message: EB=0 is a release, EB=1 reports multiple buttons without
        // saying which ones.
        if props.require("EB")? == 0 {
            return Ok(RockerAction::released());
        }
        return Err(DecodeError::UnsupportedValue {
            field: "EB",
            value: 1,
        });
    }

    let button = button_from(&props, "R1")?;
    let second_button = if props.require("SA")? == 1 {
        Some(button_from(&props, "R2")?)
    } else {
        None
    };

    Ok(RockerAction {
        press: if props.require("EB")? == 1 {
            RockerPress::Pressed
        } else {
            RockerPress::Released
        },
        button: Some(button),
        second_button,
    })
}

fn button_from(props: &PropertyMap, field: &'static str) -> Result<RockerButton, DecodeError> {
    let value = props.require(field)?;
    u8::try_from(value)
        .ok()
        .and_then(RockerButton::from_repr)
        .ok_or(DecodeError::UnsupportedValue { field, value })
}

/// Encode a rocker telegram as a PTM switch would send it.
pub fn encode(action: &RockerAction, sender: u32, destination: u32) -> Result<Telegram, EncodeError> {
    let mut props = PropertyMap::new();
    let status = match action.press {
        RockerPress::Pressed => {
            let button = action.button.ok_or_else(|| {
                EncodeError::Inconsistent("pressed rocker action without a button".into())
            })?;
            props.set("R1", button as u32).set("EB", 1);
            if let Some(second) = action.second_button {
                props.set("R2", second as u32).set("SA", 1);
            }
            STATUS_T21 | STATUS_NU
        }
        RockerPress::Released => {
            props.set("EB", 0);
            STATUS_T21
        }
    };

    Ok(PROFILE.encode(&props, sender, destination)?.with_status(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eep::BROADCAST_ID;

    fn rps(data: u8, status: u8) -> Telegram {
        Telegram::new(rorg::RPS, &[data], 0xFEF1_1234, BROADCAST_ID).with_status(status)
    }

    #[test]
    fn test_decode_actor_status_bytes() {
        let on = decode(&rps(0x70, 0x30)).unwrap();
        assert!(on.is_pressed(RockerButton::Rock3));

        let off = decode(&rps(0x50, 0x30)).unwrap();
        assert!(off.is_pressed(RockerButton::Rock2));
    }

    #[test]
    fn test_decode_release() {
        let action = decode(&rps(0x00, 0x20)).unwrap();
        assert_eq!(action, RockerAction::released());
    }

    #[test]
    fn test_decode_two_buttons() {
        // ROCK1 + ROCK3 pressed together
        let action = decode(&rps(0x37, 0x30)).unwrap();
        assert_eq!(action.button, Some(RockerButton::Rock1));
        assert_eq!(action.second_button, Some(RockerButton::Rock3));
    }

    #[test]
    fn test_decode_multi_button_u_message_is_error() {
        assert!(decode(&rps(0x10, 0x20)).is_err());
    }

    #[test]
    fn test_encode_press_and_release() {
        let press = encode(&RockerAction::pressed(RockerButton::Rock1), 1, BROADCAST_ID).unwrap();
        assert_eq!(press.data, vec![rorg::RPS, 0x30]);
        assert_eq!(press.status, 0x30);

        let release = encode(&RockerAction::released(), 1, BROADCAST_ID).unwrap();
        assert_eq!(release.data, vec![rorg::RPS, 0x00]);
        assert_eq!(release.status, 0x20);
    }

    #[test]
    fn test_button_names() {
        assert_eq!(RockerButton::Rock3.to_string(), "rock3");
        assert_eq!(RockerButton::from_repr(2), Some(RockerButton::Rock2));
    }
}
