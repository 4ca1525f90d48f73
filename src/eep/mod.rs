//! EnOcean Equipment Profile (EEP) codecs.
//!
//! Every supported device family gets a codec that converts between raw
//! radio telegrams and typed actions. The shared machinery lives here:
//! the [`Eep`] key, the [`Telegram`] value delivered by the transport, bit
//! field layouts and the [`PropertyMap`] extracted from them.
//!
//! Bit offsets follow the EEP convention: offset 0 is the most significant
//! bit of the first byte after the rorg.

pub mod dimmer;
pub mod opening;
pub mod relay;
pub mod rocker;
pub mod shutter;
pub mod two_channel;

use crate::error::{DecodeError, EncodeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::{Display, FromRepr};

/// Radio organisation bytes used by the supported profiles.
pub mod rorg {
    /// Repeated switch communication (rocker switches, handles).
    pub const RPS: u8 = 0xF6;
    /// 1 byte communication (contacts).
    pub const BS1: u8 = 0xD5;
    /// 4 byte communication (actors, sensors).
    pub const BS4: u8 = 0xA5;
}

/// Broadcast destination id.
pub const BROADCAST_ID: u32 = 0xFFFF_FFFF;

/// 4BS teach-in flag: bit clear means teach-in.
pub const LRN_OFFSET: u16 = 28;

/// Equipment profile key, e.g. `A5-38-08`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eep {
    pub rorg: u8,
    pub func: u8,
    pub kind: u8,
    pub command: Option<u8>,
}

impl Eep {
    pub const fn new(rorg: u8, func: u8, kind: u8) -> Self {
        Self {
            rorg,
            func,
            kind,
            command: None,
        }
    }

    pub const fn with_command(mut self, command: u8) -> Self {
        self.command = Some(command);
        self
    }
}

impl fmt::Display for Eep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}-{:02X}-{:02X}", self.rorg, self.func, self.kind)?;
        if let Some(command) = self.command {
            write!(f, " cmd {command}")?;
        }
        Ok(())
    }
}

/// ESP3 packet kind of a received telegram.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, Serialize, Deserialize, Default,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PacketType {
    #[default]
    Radio = 0x01,
    Response = 0x02,
    Event = 0x04,
}

/// One radio message as delivered by the transport.
///
/// `data[0]` is the rorg, the profile payload follows. Sender, status and
/// RSSI are kept apart from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    pub packet_type: PacketType,
    pub data: Vec<u8>,
    pub status: u8,
    pub sender: u32,
    pub destination: u32,
    pub rssi: Option<i32>,
}

impl Telegram {
    pub fn new(rorg: u8, payload: &[u8], sender: u32, destination: u32) -> Self {
        let mut data = Vec::with_capacity(payload.len() + 1);
        data.push(rorg);
        data.extend_from_slice(payload);
        Self {
            packet_type: PacketType::Radio,
            data,
            status: 0,
            sender,
            destination,
            rssi: None,
        }
    }

    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    pub fn with_rssi(mut self, rssi: i32) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn rorg(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn payload(&self) -> &[u8] {
        self.data.get(1..).unwrap_or(&[])
    }

    pub fn is_radio(&self) -> bool {
        self.packet_type == PacketType::Radio
    }

    /// True for a 4BS telegram with the LRN bit cleared.
    pub fn is_4bs_teach_in(&self) -> bool {
        self.rorg() == Some(rorg::BS4)
            && self.payload().len() >= 4
            && read_bits(self.payload(), LRN_OFFSET, 1) == 0
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} from {} to {} status 0x{:02X}",
            self.packet_type,
            hex::encode(&self.data),
            format_id(self.sender),
            format_id(self.destination),
            self.status
        )?;
        if let Some(rssi) = self.rssi {
            write!(f, " rssi {rssi}dBm")?;
        }
        Ok(())
    }
}

/// Format an EnOcean id the way the hardware labels print it.
pub fn format_id(id: u32) -> String {
    let b = id.to_be_bytes();
    format!("{:02X}:{:02X}:{:02X}:{:02X}", b[0], b[1], b[2], b[3])
}

/// Parse an id written as `05:81:A2:C3`, `0x0581A2C3` or `0581A2C3`.
/// Any other string is read as a decimal number.
pub fn parse_id(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex_digits) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex_digits, 16).ok();
    }
    if text.contains(':') {
        let digits: String = text.split(':').collect();
        if digits.len() != 8 {
            return None;
        }
        return u32::from_str_radix(&digits, 16).ok();
    }
    if text.len() == 8 {
        return u32::from_str_radix(text, 16).ok();
    }
    text.parse().ok()
}

/// A named bit field inside a profile payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub shortcut: &'static str,
    pub offset: u16,
    pub size: u16,
}

impl FieldDef {
    pub const fn new(shortcut: &'static str, offset: u16, size: u16) -> Self {
        Self {
            shortcut,
            offset,
            size,
        }
    }

    fn max_value(&self) -> u32 {
        if self.size >= 32 {
            u32::MAX
        } else {
            (1u32 << self.size) - 1
        }
    }
}

/// Raw field values keyed by short code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap {
    values: BTreeMap<&'static str, u32>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, shortcut: &str) -> Option<u32> {
        self.values.get(shortcut).copied()
    }

    /// Field value or a decode error naming the missing field.
    pub fn require(&self, shortcut: &'static str) -> Result<u32, DecodeError> {
        self.get(shortcut)
            .ok_or(DecodeError::MissingField(shortcut))
    }

    pub fn set(&mut self, shortcut: &'static str, value: u32) -> &mut Self {
        self.values.insert(shortcut, value);
        self
    }

    pub fn with(mut self, shortcut: &'static str, value: u32) -> Self {
        self.set(shortcut, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }
}

/// Bit layout of one profile.
#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub eep: Eep,
    pub payload_len: usize,
    pub fields: &'static [FieldDef],
}

impl Profile {
    /// Extract all fields of this layout from a telegram.
    pub fn parse(&self, telegram: &Telegram) -> Result<PropertyMap, DecodeError> {
        if !telegram.is_radio() {
            return Err(DecodeError::WrongPacketType(
                telegram.packet_type.to_string(),
            ));
        }
        let actual = telegram.rorg().unwrap_or(0);
        if actual != self.eep.rorg {
            return Err(DecodeError::WrongRorg {
                expected: self.eep.rorg,
                actual,
            });
        }
        let payload = telegram.payload();
        if payload.len() < self.payload_len {
            return Err(DecodeError::TooShort {
                needed: self.payload_len,
                actual: payload.len(),
            });
        }

        let mut props = PropertyMap::new();
        for field in self.fields {
            props.set(field.shortcut, read_bits(payload, field.offset, field.size));
        }
        Ok(props)
    }

    /// Fill the payload bytes from a property map. Fields absent from the
    /// map stay zero; values wider than the field are an error.
    pub fn build_payload(&self, props: &PropertyMap) -> Result<Vec<u8>, EncodeError> {
        let mut payload = vec![0u8; self.payload_len];
        for (shortcut, value) in props.iter() {
            let field = self
                .field(shortcut)
                .ok_or(EncodeError::UnknownField(shortcut))?;
            if value > field.max_value() {
                return Err(EncodeError::OutOfRange {
                    field: field.shortcut,
                    value: value as f64,
                });
            }
            write_bits(&mut payload, field.offset, field.size, value);
        }
        Ok(payload)
    }

    /// Build a complete radio telegram from a property map.
    pub fn encode(
        &self,
        props: &PropertyMap,
        sender: u32,
        destination: u32,
    ) -> Result<Telegram, EncodeError> {
        let payload = self.build_payload(props)?;
        Ok(Telegram::new(self.eep.rorg, &payload, sender, destination))
    }

    pub fn field(&self, shortcut: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.shortcut == shortcut)
    }
}

/// Read `size` bits starting at `offset` (MSB first). Bits past the end of
/// the buffer read as zero.
pub fn read_bits(bytes: &[u8], offset: u16, size: u16) -> u32 {
    let mut value = 0u32;
    for bit in offset..offset + size {
        let byte = bytes.get(usize::from(bit / 8)).copied().unwrap_or(0);
        let set = (byte >> (7 - bit % 8)) & 1;
        value = (value << 1) | u32::from(set);
    }
    value
}

/// Write the low `size` bits of `value` starting at `offset` (MSB first).
pub fn write_bits(bytes: &mut [u8], offset: u16, size: u16, value: u32) {
    for i in 0..size {
        let bit = offset + i;
        let Some(byte) = bytes.get_mut(usize::from(bit / 8)) else {
            return;
        };
        let mask = 1u8 << (7 - bit % 8);
        if (value >> (size - 1 - i)) & 1 == 1 {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_formats() {
        assert_eq!(parse_id("05:81:A2:C3"), Some(0x0581_A2C3));
        assert_eq!(parse_id("0x0581a2c3"), Some(0x0581_A2C3));
        assert_eq!(parse_id("FFFFFFFF"), Some(BROADCAST_ID));
        assert_eq!(parse_id("1234"), Some(1234));
        assert_eq!(parse_id("05:81:A2"), None);
        assert_eq!(parse_id("window"), None);
        assert_eq!(format_id(parse_id("0xFF812300").unwrap()), "FF:81:23:00");
    }

    const LAYOUT: &[FieldDef] = &[
        FieldDef::new("HI", 0, 4),
        FieldDef::new("MID", 4, 12),
        FieldDef::new("FLAG", 31, 1),
    ];

    const PROFILE: Profile = Profile {
        eep: Eep::new(rorg::BS4, 0x3F, 0x7F),
        payload_len: 4,
        fields: LAYOUT,
    };

    #[test]
    fn test_read_bits_across_bytes() {
        let bytes = [0xAB, 0xCD, 0x00, 0x01];
        assert_eq!(read_bits(&bytes, 0, 4), 0xA);
        assert_eq!(read_bits(&bytes, 4, 12), 0xBCD);
        assert_eq!(read_bits(&bytes, 31, 1), 1);
        assert_eq!(read_bits(&bytes, 40, 8), 0);
    }

    #[test]
    fn test_write_bits_preserves_neighbours() {
        let mut bytes = [0xFF, 0xFF];
        write_bits(&mut bytes, 4, 8, 0x00);
        assert_eq!(bytes, [0xF0, 0x0F]);
    }

    #[test]
    fn test_profile_encode_parse() {
        let props = PropertyMap::new()
            .with("HI", 0x5)
            .with("MID", 0x123)
            .with("FLAG", 1);
        let telegram = PROFILE.encode(&props, 0xFF80_0001, BROADCAST_ID).unwrap();
        assert_eq!(telegram.data, vec![0xA5, 0x51, 0x23, 0x00, 0x01]);

        let parsed = PROFILE.parse(&telegram).unwrap();
        assert_eq!(parsed, props);
    }

    #[test]
    fn test_profile_rejects_wrong_rorg() {
        let telegram = Telegram::new(rorg::RPS, &[0x70], 1, BROADCAST_ID);
        assert_eq!(
            PROFILE.parse(&telegram),
            Err(DecodeError::WrongRorg {
                expected: rorg::BS4,
                actual: rorg::RPS
            })
        );
    }

    #[test]
    fn test_profile_rejects_short_payload() {
        let telegram = Telegram::new(rorg::BS4, &[0x01, 0x02], 1, BROADCAST_ID);
        assert!(matches!(
            PROFILE.parse(&telegram),
            Err(DecodeError::TooShort { needed: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_profile_rejects_oversized_value() {
        let props = PropertyMap::new().with("HI", 0x10);
        assert!(matches!(
            PROFILE.build_payload(&props),
            Err(EncodeError::OutOfRange { field: "HI", .. })
        ));
    }

    #[test]
    fn test_eep_display_and_equality() {
        let eep = Eep::new(0xA5, 0x38, 0x08).with_command(2);
        assert_eq!(eep.to_string(), "A5-38-08 cmd 2");
        assert_ne!(eep, Eep::new(0xA5, 0x38, 0x08).with_command(1));
        assert_eq!(format_id(0x0581_A2C3), "05:81:A2:C3");
    }

    #[test]
    fn test_teach_in_detection() {
        let teach = Telegram::new(rorg::BS4, &[0xE0, 0x40, 0x0D, 0x80], 1, BROADCAST_ID);
        assert!(teach.is_4bs_teach_in());
        let data = Telegram::new(rorg::BS4, &[0x02, 0x32, 0x01, 0x09], 1, BROADCAST_ID);
        assert!(!data.is_4bs_teach_in());
    }
}
