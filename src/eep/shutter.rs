//! Shutter actor codec (Eltako FSB61 family).
//!
//! Commands use the manufacturer profile A5-3F-7F: a 16-bit drive time in
//! 100 ms units plus a direction byte. The actor reports back with
//!
//! - RPS `0x70` / `0x50`: end stop top / bottom reached
//! - RPS `0x01` / `0x02`: started moving up / down
//! - 4BS with drive time and direction: stopped after driving that long
//! - 4BS with `PSF` set: absolute position report

use super::{Eep, FieldDef, Profile, PropertyMap, Telegram, rorg};
use crate::error::{DecodeError, EncodeError};
use strum::{Display, FromRepr};

pub const EEP: Eep = Eep::new(rorg::BS4, 0x3F, 0x7F);

const FIELDS: &[FieldDef] = &[
    FieldDef::new("TIME", 0, 16),
    FieldDef::new("CMD", 16, 8),
    FieldDef::new("LRN", 28, 1),
    FieldDef::new("TSCALE", 29, 1),
    FieldDef::new("PSF", 30, 1),
];

pub const PROFILE: Profile = Profile {
    eep: EEP,
    payload_len: 4,
    fields: FIELDS,
};

const POSITION_FIELDS: &[FieldDef] = &[
    FieldDef::new("POS", 0, 8),
    FieldDef::new("ANG", 8, 8),
    FieldDef::new("PSF", 30, 1),
];

pub const POSITION_PROFILE: Profile = Profile {
    eep: EEP,
    payload_len: 4,
    fields: POSITION_FIELDS,
};

/// Teach-in telegram accepted by FSB actors.
pub const TEACH_IN: [u8; 4] = [0xFF, 0xF8, 0x0D, 0x80];

/// Longest drive time the 16-bit field is allowed to carry, in seconds.
pub const MAX_DRIVE_TIME: f64 = 300.0;

const RPS_END_TOP: u8 = 0x70;
const RPS_END_BOTTOM: u8 = 0x50;
const RPS_START_UP: u8 = 0x01;
const RPS_START_DOWN: u8 = 0x02;

/// Value of the `CMD` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum ShutterCommandType {
    Stop = 0,
    Open = 1,
    Close = 2,
    StatusRequest = 3,
}

/// Direction of travel. Up opens the shutter (towards position 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Outgoing shutter command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShutterCommand {
    Stop,
    Open { time: f64 },
    Close { time: f64 },
    StatusRequest,
    Learn,
}

impl ShutterCommand {
    /// Drive in `direction` for `time` seconds.
    pub fn drive(direction: Direction, time: f64) -> Self {
        match direction {
            Direction::Up => Self::Open { time },
            Direction::Down => Self::Close { time },
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Open { .. } => Some(Direction::Up),
            Self::Close { .. } => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn time(&self) -> Option<f64> {
        match self {
            Self::Open { time } | Self::Close { time } => Some(*time),
            _ => None,
        }
    }
}

/// Kind of a status telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ShutterStatusKind {
    Opened,
    Closed,
    Opening,
    Closing,
    Stopped,
    Position,
}

/// Decoded status telegram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShutterStatus {
    pub kind: ShutterStatusKind,
    /// Drive time in seconds for OPENED/CLOSED after a timed run.
    pub time: Option<f64>,
    /// Absolute position for POSITION reports.
    pub position: Option<f64>,
    /// OPENED/CLOSED because an end stop was reached.
    pub end_stop: bool,
}

impl ShutterStatus {
    fn new(kind: ShutterStatusKind) -> Self {
        Self {
            kind,
            time: None,
            position: None,
            end_stop: false,
        }
    }

    fn end_stop(kind: ShutterStatusKind) -> Self {
        Self {
            end_stop: true,
            ..Self::new(kind)
        }
    }

    /// Direction implied by the status, if any.
    pub fn direction(&self) -> Option<Direction> {
        match self.kind {
            ShutterStatusKind::Opened | ShutterStatusKind::Opening => Some(Direction::Up),
            ShutterStatusKind::Closed | ShutterStatusKind::Closing => Some(Direction::Down),
            _ => None,
        }
    }
}

/// Convert seconds to 100 ms units, rejecting anything above the limit.
fn time_to_units(time: f64) -> Result<u32, EncodeError> {
    if !(0.0..=MAX_DRIVE_TIME).contains(&time) {
        return Err(EncodeError::OutOfRange {
            field: "TIME",
            value: time,
        });
    }
    Ok((time * 10.0).round() as u32)
}

fn units_to_time(units: u32) -> f64 {
    f64::from(units) / 10.0
}

/// Encode a shutter command.
pub fn encode(command: &ShutterCommand, sender: u32, destination: u32) -> Result<Telegram, EncodeError> {
    let (cmd, units) = match command {
        ShutterCommand::Learn => {
            return Ok(Telegram::new(rorg::BS4, &TEACH_IN, sender, destination));
        }
        ShutterCommand::Stop => (ShutterCommandType::Stop, 0),
        ShutterCommand::StatusRequest => (ShutterCommandType::StatusRequest, 0),
        ShutterCommand::Open { time } => (ShutterCommandType::Open, time_to_units(*time)?),
        ShutterCommand::Close { time } => (ShutterCommandType::Close, time_to_units(*time)?),
    };

    let props = PropertyMap::new()
        .with("TIME", units)
        .with("CMD", cmd as u32)
        .with("LRN", 1)
        .with("TSCALE", 1);
    PROFILE.encode(&props, sender, destination)
}

/// Decode an outgoing command telegram (as sniffed from another controller).
pub fn decode_command(telegram: &Telegram) -> Result<ShutterCommand, DecodeError> {
    if telegram.is_4bs_teach_in() {
        return Ok(ShutterCommand::Learn);
    }
    let props = PROFILE.parse(telegram)?;
    let time = units_to_time(props.require("TIME")?);
    let cmd = props.require("CMD")?;
    let command_type = u8::try_from(cmd)
        .ok()
        .and_then(ShutterCommandType::from_repr)
        .ok_or(DecodeError::UnsupportedValue {
            field: "CMD",
            value: cmd,
        })?;

    Ok(match command_type {
        ShutterCommandType::Stop => ShutterCommand::Stop,
        ShutterCommandType::StatusRequest => ShutterCommand::StatusRequest,
        ShutterCommandType::Open => ShutterCommand::Open { time },
        ShutterCommandType::Close => ShutterCommand::Close { time },
    })
}

/// Decode a status telegram from the actor.
///
/// A 4BS stop without time or direction comes out as `Stopped`; working out
/// what it means is left to the caller.
pub fn decode_status(telegram: &Telegram) -> Result<ShutterStatus, DecodeError> {
    match telegram.rorg() {
        Some(rorg::RPS) => decode_rps_status(telegram),
        Some(rorg::BS4) => decode_4bs_status(telegram),
        other => Err(DecodeError::WrongRorg {
            expected: rorg::BS4,
            actual: other.unwrap_or(0),
        }),
    }
}

fn decode_rps_status(telegram: &Telegram) -> Result<ShutterStatus, DecodeError> {
    let value = telegram
        .payload()
        .first()
        .copied()
        .ok_or(DecodeError::TooShort {
            needed: 1,
            actual: 0,
        })?;
    match value {
        RPS_END_TOP => Ok(ShutterStatus::end_stop(ShutterStatusKind::Opened)),
        RPS_END_BOTTOM => Ok(ShutterStatus::end_stop(ShutterStatusKind::Closed)),
        RPS_START_UP => Ok(ShutterStatus::new(ShutterStatusKind::Opening)),
        RPS_START_DOWN => Ok(ShutterStatus::new(ShutterStatusKind::Closing)),
        // release telegram some actors send after the end-stop message
        0x00 => Err(DecodeError::NoState("rocker release")),
        other => Err(DecodeError::UnsupportedValue {
            field: "RPS",
            value: u32::from(other),
        }),
    }
}

fn decode_4bs_status(telegram: &Telegram) -> Result<ShutterStatus, DecodeError> {
    if telegram.is_4bs_teach_in() {
        return Err(DecodeError::TeachIn);
    }
    let props = PROFILE.parse(telegram)?;

    if props.require("PSF")? == 1 {
        let pos = POSITION_PROFILE.parse(telegram)?.require("POS")?;
        if pos > 100 {
            return Err(DecodeError::UnsupportedValue {
                field: "POS",
                value: pos,
            });
        }
        return Ok(ShutterStatus {
            position: Some(f64::from(pos)),
            ..ShutterStatus::new(ShutterStatusKind::Position)
        });
    }

    let units = props.require("TIME")?;
    let time = if props.require("TSCALE")? == 1 {
        units_to_time(units)
    } else {
        // seconds in the low byte
        f64::from(units & 0xFF)
    };

    let cmd = props.require("CMD")?;
    let kind = match ShutterCommandType::from_repr(cmd as u8) {
        _ if cmd > 0xFF => None,
        Some(ShutterCommandType::Stop) => Some(ShutterStatusKind::Stopped),
        Some(ShutterCommandType::Open) => Some(ShutterStatusKind::Opened),
        Some(ShutterCommandType::Close) => Some(ShutterStatusKind::Closed),
        _ => None,
    }
    .ok_or(DecodeError::UnsupportedValue {
        field: "CMD",
        value: cmd,
    })?;

    Ok(ShutterStatus {
        time: (kind != ShutterStatusKind::Stopped).then_some(time),
        ..ShutterStatus::new(kind)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eep::BROADCAST_ID;

    const ACTOR: u32 = 0x0581_A2C5;

    fn status_4bs(payload: [u8; 4]) -> Telegram {
        Telegram::new(rorg::BS4, &payload, ACTOR, BROADCAST_ID)
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let commands = [
            ShutterCommand::Stop,
            ShutterCommand::Open { time: 12.3 },
            ShutterCommand::Close { time: 300.0 },
            ShutterCommand::StatusRequest,
            ShutterCommand::Learn,
        ];
        for command in commands {
            let telegram = encode(&command, 0xFF80_0003, ACTOR).unwrap();
            assert_eq!(decode_command(&telegram).unwrap(), command);
        }
    }

    #[test]
    fn test_encode_close_bytes() {
        let telegram = encode(&ShutterCommand::Close { time: 25.6 }, 1, ACTOR).unwrap();
        // 256 units of 100 ms, CMD down, LRN + TSCALE
        assert_eq!(telegram.data, vec![0xA5, 0x01, 0x00, 0x02, 0x0C]);
    }

    #[test]
    fn test_encode_rejects_excess_time() {
        assert!(matches!(
            encode(&ShutterCommand::Open { time: 300.1 }, 1, ACTOR),
            Err(EncodeError::OutOfRange { field: "TIME", .. })
        ));
        assert!(encode(&ShutterCommand::Open { time: -1.0 }, 1, ACTOR).is_err());
    }

    #[test]
    fn test_decode_rps_statuses() {
        let rps = |b: u8| Telegram::new(rorg::RPS, &[b], ACTOR, BROADCAST_ID);

        let top = decode_status(&rps(0x70)).unwrap();
        assert_eq!(top.kind, ShutterStatusKind::Opened);
        assert!(top.end_stop);

        let bottom = decode_status(&rps(0x50)).unwrap();
        assert_eq!(bottom.kind, ShutterStatusKind::Closed);
        assert_eq!(bottom.direction(), Some(Direction::Down));

        assert_eq!(decode_status(&rps(0x01)).unwrap().kind, ShutterStatusKind::Opening);
        assert_eq!(decode_status(&rps(0x02)).unwrap().kind, ShutterStatusKind::Closing);
        assert!(decode_status(&rps(0x30)).is_err());
    }

    #[test]
    fn test_decode_timed_stop() {
        let status = decode_status(&status_4bs([0x00, 0x7B, 0x01, 0x0C])).unwrap();
        assert_eq!(status.kind, ShutterStatusKind::Opened);
        assert_eq!(status.time, Some(12.3));
        assert!(!status.end_stop);
    }

    #[test]
    fn test_decode_stopped_is_ambiguous() {
        let status = decode_status(&status_4bs([0x00, 0x00, 0x00, 0x0C])).unwrap();
        assert_eq!(status.kind, ShutterStatusKind::Stopped);
        assert_eq!(status.time, None);
        assert_eq!(status.direction(), None);
    }

    #[test]
    fn test_decode_position_report() {
        let status = decode_status(&status_4bs([0x2A, 0x00, 0x00, 0x0A])).unwrap();
        assert_eq!(status.kind, ShutterStatusKind::Position);
        assert_eq!(status.position, Some(42.0));

        assert!(decode_status(&status_4bs([0x80, 0x00, 0x00, 0x0A])).is_err());
    }

    #[test]
    fn test_decode_seconds_scale() {
        let status = decode_status(&status_4bs([0x00, 0x0F, 0x02, 0x08])).unwrap();
        assert_eq!(status.kind, ShutterStatusKind::Closed);
        assert_eq!(status.time, Some(15.0));
    }
}
