//! Opening sensors: window handle (F6-10-00) and contact (D5-00-01).

use super::{Eep, FieldDef, Profile, Telegram, rorg};
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use strum::Display;

pub const HANDLE_EEP: Eep = Eep::new(rorg::RPS, 0x10, 0x00);
pub const CONTACT_EEP: Eep = Eep::new(rorg::BS1, 0x00, 0x01);

const HANDLE_FIELDS: &[FieldDef] = &[FieldDef::new("WIN", 0, 4)];

pub const HANDLE_PROFILE: Profile = Profile {
    eep: HANDLE_EEP,
    payload_len: 1,
    fields: HANDLE_FIELDS,
};

const CONTACT_FIELDS: &[FieldDef] = &[FieldDef::new("LRN", 4, 1), FieldDef::new("CO", 7, 1)];

pub const CONTACT_PROFILE: Profile = Profile {
    eep: CONTACT_EEP,
    payload_len: 1,
    fields: CONTACT_FIELDS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OpeningState {
    Closed,
    Open,
    Tilted,
}

/// Sensor hardware variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpeningSensorKind {
    Handle,
    Contact,
}

impl OpeningSensorKind {
    pub fn rorg(self) -> u8 {
        match self {
            Self::Handle => rorg::RPS,
            Self::Contact => rorg::BS1,
        }
    }

    pub fn decode(self, telegram: &Telegram) -> Result<OpeningState, DecodeError> {
        match self {
            Self::Handle => decode_handle(telegram),
            Self::Contact => decode_contact(telegram),
        }
    }
}

pub fn decode_handle(telegram: &Telegram) -> Result<OpeningState, DecodeError> {
    let win = HANDLE_PROFILE.parse(telegram)?.require("WIN")?;
    match win {
        0xF => Ok(OpeningState::Closed),
        0xC | 0xE => Ok(OpeningState::Open),
        0xD => Ok(OpeningState::Tilted),
        value => Err(DecodeError::UnsupportedValue {
            field: "WIN",
            value,
        }),
    }
}

pub fn decode_contact(telegram: &Telegram) -> Result<OpeningState, DecodeError> {
    let props = CONTACT_PROFILE.parse(telegram)?;
    if props.require("LRN")? == 0 {
        return Err(DecodeError::TeachIn);
    }
    Ok(if props.require("CO")? == 1 {
        OpeningState::Closed
    } else {
        OpeningState::Open
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eep::BROADCAST_ID;

    fn telegram(rorg: u8, byte: u8) -> Telegram {
        Telegram::new(rorg, &[byte], 0x0182_3456, BROADCAST_ID)
    }

    #[test]
    fn test_handle_positions() {
        assert_eq!(decode_handle(&telegram(rorg::RPS, 0xF0)).unwrap(), OpeningState::Closed);
        assert_eq!(decode_handle(&telegram(rorg::RPS, 0xC0)).unwrap(), OpeningState::Open);
        assert_eq!(decode_handle(&telegram(rorg::RPS, 0xE0)).unwrap(), OpeningState::Open);
        assert_eq!(decode_handle(&telegram(rorg::RPS, 0xD0)).unwrap(), OpeningState::Tilted);
        assert!(decode_handle(&telegram(rorg::RPS, 0x30)).is_err());
    }

    #[test]
    fn test_contact_states() {
        assert_eq!(decode_contact(&telegram(rorg::BS1, 0x09)).unwrap(), OpeningState::Closed);
        assert_eq!(decode_contact(&telegram(rorg::BS1, 0x08)).unwrap(), OpeningState::Open);
        assert_eq!(decode_contact(&telegram(rorg::BS1, 0x00)), Err(DecodeError::TeachIn));
    }

    #[test]
    fn test_wrong_rorg() {
        assert!(OpeningSensorKind::Contact.decode(&telegram(rorg::RPS, 0x09)).is_err());
    }
}
