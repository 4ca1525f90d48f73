use crate::device::scene::SceneConfig;
use crate::eep::parse_id;
use crate::error::{ConfigError, Result};
use rumqttc::QoS;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment file read by [`load_dotenv`].
const DOTENV_FILE: &str = ".env";

/// Split a `KEY=value` line of an env file. Blank lines, comments and lines
/// without `=` yield `None`; an `export ` prefix and matching quotes around
/// the value are stripped.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let unquoted = ['"', '\'']
        .into_iter()
        .find_map(|q| value.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(value);
    Some((key, unquoted))
}

/// Copy `.env` entries into the process environment. Variables that are
/// already set win. Call first thing in `main`.
pub fn load_dotenv() {
    let Ok(content) = fs::read_to_string(DOTENV_FILE) else {
        return;
    };
    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(key).is_none() {
            // SAFETY: runs before any task reads or writes the environment
            unsafe { std::env::set_var(key, value) };
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub enocean: EnoceanConfig,
    /// Default max age for restored storage entries.
    #[serde(default)]
    pub storage_max_age_secs: Option<u64>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Broker-side last will of the bridge connection itself.
    pub last_will: Option<LastWillConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastWillConfig {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnoceanConfig {
    /// Base id of the USB gateway; outgoing telegrams default to it.
    #[serde(deserialize_with = "deserialize_id")]
    pub base_id: u32,
    /// Topic on which the gateway publishes received telegrams.
    pub rx_topic: String,
    /// Topic the gateway listens on for telegrams to transmit.
    pub tx_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "enocean-mqtt-bridge".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            last_will: None,
        }
    }
}

impl Default for EnoceanConfig {
    fn default() -> Self {
        Self {
            base_id: 0,
            rx_topic: "enocean/gateway/rx".to_string(),
            tx_topic: "enocean/gateway/tx".to_string(),
        }
    }
}

impl Config {
    /// Default config file location (`~/.config/enocean-mqtt/config.yaml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("enocean-mqtt")
            .join("config.yaml")
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(text)?;
        config.apply_defaults();
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Propagate global defaults into the device entries.
    fn apply_defaults(&mut self) {
        for device in &mut self.devices {
            if device.storage_max_age_secs.is_none() {
                device.storage_max_age_secs = self.storage_max_age_secs;
            }
        }
    }

    /// Apply broker overrides from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            self.mqtt.broker_port = p;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
    }
}

/// Static settings of one device. Which fields are required depends on
/// the device type; factories check them via the `require_*` helpers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub enocean_target: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub enocean_sender: Option<u32>,
    #[serde(default)]
    pub mqtt_channel_cmd: Option<String>,
    #[serde(default)]
    pub mqtt_channel_state: Option<String>,
    #[serde(default)]
    pub mqtt_qos: u8,
    #[serde(default)]
    pub mqtt_retain: bool,
    #[serde(default)]
    pub mqtt_last_will: Option<String>,
    #[serde(default)]
    pub offline_timeout_secs: Option<u64>,
    #[serde(default)]
    pub offline_reannounce_secs: Option<u64>,
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
    #[serde(default)]
    pub time_up_driving: Option<f64>,
    #[serde(default)]
    pub time_up_rolling: Option<f64>,
    #[serde(default)]
    pub time_down_driving: Option<f64>,
    #[serde(default)]
    pub time_down_rolling: Option<f64>,
    #[serde(default)]
    pub storage_file: Option<PathBuf>,
    #[serde(default)]
    pub storage_max_age_secs: Option<u64>,
    #[serde(default)]
    pub dedup_window_secs: Option<f64>,
    #[serde(default)]
    pub scenes: Vec<SceneConfig>,
}

impl DeviceConfig {
    fn missing(&self, field: &'static str) -> ConfigError {
        ConfigError::MissingField {
            device: self.name.clone(),
            field,
        }
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            device: self.name.clone(),
            field,
            reason: reason.into(),
        }
    }

    pub fn require_target(&self) -> std::result::Result<u32, ConfigError> {
        self.enocean_target
            .ok_or_else(|| self.missing("enocean_target"))
    }

    pub fn require_state_channel(&self) -> std::result::Result<String, ConfigError> {
        non_empty(&self.mqtt_channel_state).ok_or_else(|| self.missing("mqtt_channel_state"))
    }

    pub fn require_cmd_channel(&self) -> std::result::Result<String, ConfigError> {
        non_empty(&self.mqtt_channel_cmd).ok_or_else(|| self.missing("mqtt_channel_cmd"))
    }

    pub fn require_storage_file(&self) -> std::result::Result<PathBuf, ConfigError> {
        self.storage_file
            .clone()
            .ok_or_else(|| self.missing("storage_file"))
    }

    /// A positive timing constant in seconds.
    pub fn require_seconds(
        &self,
        field: &'static str,
        value: Option<f64>,
    ) -> std::result::Result<f64, ConfigError> {
        let value = value.ok_or_else(|| self.missing(field))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(self.invalid(field, format!("{value} is not a positive duration")));
        }
        Ok(value)
    }

    pub fn qos(&self) -> std::result::Result<QoS, ConfigError> {
        match self.mqtt_qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(self.invalid("mqtt_qos", format!("{other} is not 0, 1 or 2"))),
        }
    }

    pub fn offline_timeout(&self) -> Option<Duration> {
        self.offline_timeout_secs.map(Duration::from_secs)
    }

    pub fn offline_reannounce(&self) -> Option<Duration> {
        self.offline_reannounce_secs.map(Duration::from_secs)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn storage_max_age(&self) -> Option<Duration> {
        self.storage_max_age_secs.map(Duration::from_secs)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn qos_from_u8(value: u8) -> QoS {
    match value {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

fn raw_to_id<E: serde::de::Error>(raw: RawId) -> std::result::Result<u32, E> {
    match raw {
        RawId::Number(n) => u32::try_from(n).map_err(|_| E::custom(format!("id {n} exceeds 32 bits"))),
        RawId::Text(s) => parse_id(&s).ok_or_else(|| E::custom(format!("invalid EnOcean id '{s}'"))),
    }
}

/// Accept `0x0581A2C3`, `05:81:A2:C3`, `0581A2C3` or a plain integer.
pub fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    raw_to_id(RawId::deserialize(deserializer)?)
}

pub fn deserialize_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u32>, D::Error> {
    match Option::<RawId>::deserialize(deserializer)? {
        Some(raw) => raw_to_id(raw).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_line() {
        assert_eq!(parse_env_line("MQTT_BROKER_HOST=broker.lan"), Some(("MQTT_BROKER_HOST", "broker.lan")));
        assert_eq!(parse_env_line("  export MQTT_USERNAME = bridge "), Some(("MQTT_USERNAME", "bridge")));
        assert_eq!(parse_env_line(r#"MQTT_PASSWORD="two words""#), Some(("MQTT_PASSWORD", "two words")));
        assert_eq!(parse_env_line("NAME='x'"), Some(("NAME", "x")));
        assert_eq!(parse_env_line(r#"ODD="x'"#), Some(("ODD", r#""x'"#)));
        assert_eq!(parse_env_line("# comment"), None);
        assert_eq!(parse_env_line(""), None);
        assert_eq!(parse_env_line("no equals sign"), None);
        assert_eq!(parse_env_line("=value"), None);
    }

    const SAMPLE: &str = r#"
mqtt:
  broker_host: broker.local
  client_id: test-bridge
  last_will: { topic: enocean/bridge, payload: offline, retain: true, qos: 1 }
enocean:
  base_id: "FF:81:23:00"
storage_max_age_secs: 3600
devices:
  - name: living_shutter
    type: fsb61
    enocean_target: 0x0581A2C3
    mqtt_channel_cmd: home/shutter/cmd
    mqtt_channel_state: home/shutter/state
    mqtt_qos: 1
    time_up_driving: 18.0
    time_up_rolling: 4.5
    time_down_driving: 17.0
    time_down_rolling: 4.0
    storage_file: /tmp/shutter.json
    scenes:
      - { switch_id: "FE:F1:12:34", button: rock3, topic: home/shutter/cmd, payload: open }
  - name: hall_light
    type: fsr61
    enocean_target: 92381891
    mqtt_channel_state: home/hall/state
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.mqtt.broker_host, "broker.local");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.enocean.base_id, 0xFF81_2300);
        assert_eq!(config.enocean.rx_topic, "enocean/gateway/rx");
        assert_eq!(config.devices.len(), 2);

        let shutter = &config.devices[0];
        assert_eq!(shutter.kind, "fsb61");
        assert_eq!(shutter.require_target().unwrap(), 0x0581_A2C3);
        assert_eq!(shutter.qos().unwrap(), QoS::AtLeastOnce);
        assert_eq!(shutter.storage_max_age(), Some(Duration::from_secs(3600)));
        assert_eq!(shutter.scenes.len(), 1);
        assert_eq!(shutter.scenes[0].switch_id, 0xFEF1_1234);
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let light = &config.devices[1];
        assert_eq!(light.require_target().unwrap(), 92381891);
        assert_eq!(
            light.require_cmd_channel(),
            Err(ConfigError::MissingField {
                device: "hall_light".into(),
                field: "mqtt_channel_cmd"
            })
        );
        assert!(light.require_seconds("time_up_driving", light.time_up_driving).is_err());
    }

    #[test]
    fn test_invalid_values() {
        let device = DeviceConfig {
            name: "x".into(),
            mqtt_qos: 3,
            time_up_driving: Some(-1.0),
            ..Default::default()
        };
        assert!(device.qos().is_err());
        assert!(matches!(
            device.require_seconds("time_up_driving", device.time_up_driving),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_bad_id_is_rejected() {
        let yaml = "devices:\n  - name: a\n    type: fsr61\n    enocean_target: nonsense\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_blank_channel_counts_as_missing() {
        let device = DeviceConfig {
            name: "x".into(),
            mqtt_channel_state: Some("  ".into()),
            ..Default::default()
        };
        assert!(device.require_state_channel().is_err());
    }
}
