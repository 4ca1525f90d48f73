use thiserror::Error as ThisError;

/// Top-level error for the bridge.
#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Shutter position error: {0}")]
    Position(String),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("MQTT connection lost: {0}")]
    ConnectionLost(String),

    #[error("Radio transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    SerdeYamlError(#[from] serde_yaml::Error),
}

/// Invalid or incomplete configuration. Fatal for the affected device only.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("[{device}] missing required field '{field}'")]
    MissingField { device: String, field: &'static str },

    #[error("[{device}] invalid value for '{field}': {reason}")]
    InvalidValue {
        device: String,
        field: &'static str,
        reason: String,
    },

    #[error("[{device}] unknown device type '{kind}'")]
    UnknownType { device: String, kind: String },
}

/// A telegram that does not match the expected profile. Always soft.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unexpected rorg 0x{actual:02X} (expected 0x{expected:02X})")]
    WrongRorg { expected: u8, actual: u8 },

    #[error("unexpected packet type {0}")]
    WrongPacketType(String),

    #[error("telegram payload too short ({actual} bytes, need {needed})")]
    TooShort { needed: usize, actual: usize },

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has unsupported value {value}")]
    UnsupportedValue { field: &'static str, value: u32 },

    #[error("teach-in telegram")]
    TeachIn,

    #[error("telegram carries no state ({0})")]
    NoState(&'static str),
}

/// Caller asked for an internally inconsistent or unencodable action.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("inconsistent action: {0}")]
    Inconsistent(String),

    #[error("value {value} out of range for field '{field}'")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("field '{0}' not defined in layout")]
    UnknownField(&'static str),
}

/// Unparseable MQTT command payload.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty command payload")]
    Empty,

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid JSON command: {0}")]
    InvalidJson(String),

    #[error("no command key in JSON payload")]
    NoCommandKey,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("value {0} out of range 0..=100")]
    OutOfRange(i64),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
