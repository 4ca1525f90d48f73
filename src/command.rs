//! MQTT command payload parsing.
//!
//! Payloads arrive as plain text (`on`, ` 50 `) or JSON objects
//! (`{"state": "ON"}`). Both are normalized into a [`Command`].

use crate::error::ParseError;
use serde_json::Value;
use std::fmt;

/// JSON keys checked for a command value, in order.
const JSON_KEYS: &[&str] = &["command", "cmd", "state", "COMMAND", "CMD", "STATE"];

const ON_WORDS: &[&str] = &["on", "true"];
const OFF_WORDS: &[&str] = &["off", "false"];
const TOGGLE_WORDS: &[&str] = &["toggle"];
const LEARN_WORDS: &[&str] = &["learn", "teach", "teach-in"];
const UPDATE_WORDS: &[&str] = &["update", "refresh", "query"];
const STOP_WORDS: &[&str] = &["stop"];
const OPEN_WORDS: &[&str] = &["open", "up"];
const CLOSE_WORDS: &[&str] = &["close", "down"];

/// Normalized intent of an MQTT command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    On,
    Off,
    Toggle,
    /// Brightness in percent, 1..=100.
    Dim(u8),
    /// Shutter position in percent, 0 = open, 100 = closed.
    Position(f64),
    Learn,
    Update,
    Stop,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "ON"),
            Self::Off => write!(f, "OFF"),
            Self::Toggle => write!(f, "TOGGLE"),
            Self::Dim(value) => write!(f, "DIM({value})"),
            Self::Position(value) => write!(f, "POSITION({value})"),
            Self::Learn => write!(f, "LEARN"),
            Self::Update => write!(f, "UPDATE"),
            Self::Stop => write!(f, "STOP"),
        }
    }
}

/// True for commands that switch something on.
pub fn is_on(command: &Command) -> bool {
    match command {
        Command::On => true,
        Command::Dim(value) => *value > 0,
        _ => false,
    }
}

/// True for commands that switch something off.
pub fn is_off(command: &Command) -> bool {
    matches!(command, Command::Off | Command::Dim(0))
}

/// How numeric payloads are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumericMode {
    /// Switching devices: 0 is OFF, anything positive is ON.
    #[default]
    Switch,
    /// Dimmers: integer 0..=100, 0 is OFF, out of range is an error.
    Dim,
    /// Shutters: float, clamped to 0..=100.
    Position,
}

/// Parse an MQTT payload into a command.
pub fn parse(payload: &[u8], mode: NumericMode) -> Result<Command, ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let value = if text.starts_with('{') {
        extract_json_value(text)?
    } else {
        text.to_string()
    };

    parse_value(&value, mode)
}

fn extract_json_value(text: &str) -> Result<String, ParseError> {
    let json: Value =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let object = json
        .as_object()
        .ok_or_else(|| ParseError::InvalidJson("not an object".into()))?;

    for key in JSON_KEYS {
        match object.get(*key) {
            Some(Value::String(s)) => return Ok(s.clone()),
            Some(Value::Number(n)) => return Ok(n.to_string()),
            Some(Value::Bool(b)) => return Ok(b.to_string()),
            _ => continue,
        }
    }
    Err(ParseError::NoCommandKey)
}

fn parse_value(raw: &str, mode: NumericMode) -> Result<Command, ParseError> {
    let word = raw.trim().to_lowercase();

    if ON_WORDS.contains(&word.as_str()) {
        return Ok(Command::On);
    }
    if OFF_WORDS.contains(&word.as_str()) {
        return Ok(Command::Off);
    }
    if TOGGLE_WORDS.contains(&word.as_str()) {
        return Ok(Command::Toggle);
    }
    if LEARN_WORDS.contains(&word.as_str()) {
        return Ok(Command::Learn);
    }
    if UPDATE_WORDS.contains(&word.as_str()) {
        return Ok(Command::Update);
    }
    if STOP_WORDS.contains(&word.as_str()) {
        return Ok(Command::Stop);
    }
    if mode == NumericMode::Position {
        if OPEN_WORDS.contains(&word.as_str()) {
            return Ok(Command::Position(0.0));
        }
        if CLOSE_WORDS.contains(&word.as_str()) {
            return Ok(Command::Position(100.0));
        }
    }

    match mode {
        NumericMode::Switch => {
            let value: f64 = word.parse().map_err(|_| ParseError::Unknown(raw.into()))?;
            Ok(if value > 0.0 { Command::On } else { Command::Off })
        }
        NumericMode::Dim => {
            let value: i64 = word.parse().map_err(|_| ParseError::Unknown(raw.into()))?;
            match value {
                0 => Ok(Command::Off),
                1..=100 => Ok(Command::Dim(value as u8)),
                _ => Err(ParseError::OutOfRange(value)),
            }
        }
        NumericMode::Position => {
            let value: f64 = word.parse().map_err(|_| ParseError::Unknown(raw.into()))?;
            if value.is_nan() {
                return Err(ParseError::Unknown(raw.into()));
            }
            Ok(Command::Position(value.clamp(0.0, 100.0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_ignore_case_and_whitespace() {
        let cases: &[(&str, Command)] = &[
            ("on", Command::On),
            ("  ON\n", Command::On),
            ("Off", Command::Off),
            ("\tTOGGLE ", Command::Toggle),
            ("teach", Command::Learn),
            ("Teach-In", Command::Learn),
            ("LEARN", Command::Learn),
            ("refresh", Command::Update),
            (" Query ", Command::Update),
            ("update", Command::Update),
            ("STOP", Command::Stop),
        ];
        for (input, expected) in cases {
            for mode in [NumericMode::Switch, NumericMode::Dim, NumericMode::Position] {
                assert_eq!(parse(input.as_bytes(), mode).unwrap(), *expected, "{input:?}");
            }
        }
    }

    #[test]
    fn test_dimmer_numbers() {
        assert_eq!(parse(b"0", NumericMode::Dim).unwrap(), Command::Off);
        assert_eq!(parse(b"100", NumericMode::Dim).unwrap(), Command::Dim(100));
        assert_eq!(parse(b"1", NumericMode::Dim).unwrap(), Command::Dim(1));
        assert_eq!(parse(b" 50 ", NumericMode::Dim).unwrap(), Command::Dim(50));
        assert_eq!(parse(b"101", NumericMode::Dim), Err(ParseError::OutOfRange(101)));
        assert_eq!(parse(b"-1", NumericMode::Dim), Err(ParseError::OutOfRange(-1)));
        assert!(parse(b"12.5", NumericMode::Dim).is_err());
    }

    #[test]
    fn test_position_numbers_clamp() {
        assert_eq!(parse(b"42.5", NumericMode::Position).unwrap(), Command::Position(42.5));
        assert_eq!(parse(b"150", NumericMode::Position).unwrap(), Command::Position(100.0));
        assert_eq!(parse(b"-3", NumericMode::Position).unwrap(), Command::Position(0.0));
        assert_eq!(parse(b"open", NumericMode::Position).unwrap(), Command::Position(0.0));
        assert_eq!(parse(b"Down", NumericMode::Position).unwrap(), Command::Position(100.0));
    }

    #[test]
    fn test_switch_numbers() {
        assert_eq!(parse(b"1", NumericMode::Switch).unwrap(), Command::On);
        assert_eq!(parse(b"0", NumericMode::Switch).unwrap(), Command::Off);
        assert!(parse(b"open", NumericMode::Switch).is_err());
    }

    #[test]
    fn test_json_key_precedence() {
        let payload = br#"{"state": "off", "command": "on"}"#;
        assert_eq!(parse(payload, NumericMode::Switch).unwrap(), Command::On);

        let payload = br#"{"STATE": "Toggle"}"#;
        assert_eq!(parse(payload, NumericMode::Switch).unwrap(), Command::Toggle);

        let payload = br#" {"cmd": 75} "#;
        assert_eq!(parse(payload, NumericMode::Dim).unwrap(), Command::Dim(75));
    }

    #[test]
    fn test_json_errors() {
        assert_eq!(
            parse(br#"{"brightness": 3}"#, NumericMode::Dim),
            Err(ParseError::NoCommandKey)
        );
        assert!(matches!(
            parse(b"{not json", NumericMode::Dim),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_garbage_is_error() {
        assert_eq!(parse(b"", NumericMode::Switch), Err(ParseError::Empty));
        assert_eq!(
            parse(b"banana", NumericMode::Switch),
            Err(ParseError::Unknown("banana".into()))
        );
        assert_eq!(parse(&[0xFF, 0xFE], NumericMode::Switch), Err(ParseError::InvalidUtf8));
    }

    #[test]
    fn test_predicates() {
        assert!(is_on(&Command::On));
        assert!(is_on(&Command::Dim(10)));
        assert!(is_off(&Command::Off));
        assert!(!is_off(&Command::Toggle));
    }
}
