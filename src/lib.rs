//! EnOcean to MQTT bridge library.
//!
//! Translates between EnOcean radio telegrams of building automation actors
//! and sensors (relays, dimmers, shutters, window handles, contacts) and
//! JSON messages on an MQTT broker.

pub mod bridge;
pub mod command;
pub mod config;
pub mod device;
pub mod eep;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod shutter_position;
pub mod storage;
pub mod transport;
