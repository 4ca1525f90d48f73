//! Window handle and door/window contact sensors.

use super::common::{
    EnoceanBinding, MqttBinding, OfflineWatch, RefreshTimer, check_offline, elapsed,
    format_timestamp, status_message, storage_from_config,
};
use super::scene::SceneOverlay;
use super::{CyclicTask, Device, DeviceContext, EnoceanHandler, MqttHandler};
use crate::command::{self, Command, NumericMode};
use crate::config::DeviceConfig;
use crate::eep::opening::{OpeningSensorKind, OpeningState};
use crate::eep::{Telegram, format_id};
use crate::error::{ConfigError, DecodeError, Result};
use crate::storage::{Storage, keys};
use crate::transport::MqttMessage;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde_json::Value;
use std::time::Duration;

/// Repeated identical reports within this window are dropped.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

pub struct OpeningSensor {
    name: String,
    kind: OpeningSensorKind,
    enocean: EnoceanBinding,
    mqtt: MqttBinding,
    scenes: SceneOverlay,
    offline: OfflineWatch,
    refresh: RefreshTimer,
    storage: Storage,
    dedup_window: Duration,
    last_value: Option<OpeningState>,
    last_value_since: Option<DateTime<Local>>,
    last_observation: Option<DateTime<Local>>,
    last_error: Option<String>,
    last_error_since: Option<DateTime<Local>>,
    rssi: Option<i32>,
}

impl OpeningSensor {
    pub fn from_config(
        config: &DeviceConfig,
        kind: OpeningSensorKind,
    ) -> std::result::Result<Self, ConfigError> {
        let dedup_window = match config.dedup_window_secs {
            Some(secs) if secs.is_finite() && secs >= 0.0 => Duration::from_secs_f64(secs),
            Some(secs) => {
                return Err(ConfigError::InvalidValue {
                    device: config.name.clone(),
                    field: "dedup_window_secs",
                    reason: format!("{secs} is not a valid duration"),
                });
            }
            None => DEFAULT_DEDUP_WINDOW,
        };
        Ok(Self {
            name: config.name.clone(),
            kind,
            enocean: EnoceanBinding::from_config(config)?,
            mqtt: MqttBinding::from_config(config, false)?,
            scenes: SceneOverlay::from_config(config)?,
            offline: OfflineWatch::from_config(config),
            refresh: RefreshTimer::from_config(config),
            storage: storage_from_config(config),
            dedup_window,
            last_value: None,
            last_value_since: None,
            last_observation: None,
            last_error: None,
            last_error_since: None,
            rssi: None,
        })
    }

    pub fn handle(config: &DeviceConfig) -> std::result::Result<Self, ConfigError> {
        Self::from_config(config, OpeningSensorKind::Handle)
    }

    pub fn contact(config: &DeviceConfig) -> std::result::Result<Self, ConfigError> {
        Self::from_config(config, OpeningSensorKind::Contact)
    }

    pub fn last_value(&self) -> Option<OpeningState> {
        self.last_value
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn is_duplicate(&self, state: OpeningState, now: DateTime<Local>) -> bool {
        self.last_value == Some(state)
            && self
                .last_observation
                .is_some_and(|seen| elapsed(seen, now) < self.dedup_window)
    }

    fn record_value(&mut self, state: OpeningState, now: DateTime<Local>) {
        if self.last_value != Some(state) {
            self.last_value = Some(state);
            self.last_value_since = Some(now);
            self.storage.set(keys::LAST_VALUE, &state, now);
            self.storage.set(keys::LAST_VALUE_SINCE, &format_timestamp(now), now);
        }
        self.last_observation = Some(now);
        self.storage.set(keys::LAST_OBSERVATION, &format_timestamp(now), now);
        self.storage.save();
    }

    fn record_error(&mut self, error: &DecodeError, now: DateTime<Local>) {
        let text = error.to_string();
        if self.last_error.as_deref() != Some(text.as_str()) {
            self.last_error_since = Some(now);
            self.storage.set(keys::LAST_ERROR_SINCE, &format_timestamp(now), now);
        }
        self.storage.set_and_save(keys::LAST_ERROR, &text, now);
        self.last_error = Some(text);
    }

    fn publish_state(&self, ctx: &mut DeviceContext) {
        let Some(state) = self.last_value else {
            debug!("[{}] No state yet, nothing to publish", self.name);
            return;
        };
        let mut message = status_message(&self.name, ctx.now, self.rssi);
        message.insert("status".into(), state.to_string().into());
        if let Some(since) = self.last_value_since {
            message.insert("since".into(), format_timestamp(since).into());
        }
        self.mqtt.publish_json(ctx, &Value::Object(message));
    }
}

impl EnoceanHandler for OpeningSensor {
    fn enocean_ids(&self) -> Vec<u32> {
        let mut ids = vec![self.enocean.target];
        ids.extend(self.scenes.switch_ids());
        ids
    }

    fn process_enocean_message(&mut self, telegram: &Telegram, ctx: &mut DeviceContext) -> Result<()> {
        if self.scenes.process(&self.name, telegram, &self.mqtt, ctx).is_some() {
            return Ok(());
        }
        if telegram.sender != self.enocean.target || !telegram.is_radio() {
            return Ok(());
        }
        self.offline.seen(ctx.now);
        self.rssi = telegram.rssi;

        let state = match self.kind.decode(telegram) {
            Ok(state) => state,
            Err(DecodeError::TeachIn) => {
                info!("[{}] Teach-in telegram from {}", self.name, format_id(telegram.sender));
                return Ok(());
            }
            Err(e) => {
                warn!("[{}] Cannot decode telegram {}: {}", self.name, telegram, e);
                self.record_error(&e, ctx.now);
                return Ok(());
            }
        };

        if self.is_duplicate(state, ctx.now) {
            debug!("[{}] Duplicate {} report dropped", self.name, state);
            self.last_observation = Some(ctx.now);
            return Ok(());
        }

        if self.last_value != Some(state) {
            info!("[{}] {}", self.name, state);
        }
        self.record_value(state, ctx.now);
        self.publish_state(ctx);
        Ok(())
    }
}

impl MqttHandler for OpeningSensor {
    fn mqtt_topics(&self) -> Vec<String> {
        self.mqtt.topics()
    }

    fn process_mqtt_message(&mut self, message: &MqttMessage, ctx: &mut DeviceContext) -> Result<()> {
        if !self.mqtt.is_command(&message.topic) {
            return Ok(());
        }
        match command::parse(message.payload.as_bytes(), NumericMode::Switch)? {
            Command::Update => self.publish_state(ctx),
            other => warn!("[{}] Sensors only accept update, got {}", self.name, other),
        }
        Ok(())
    }
}

impl CyclicTask for OpeningSensor {
    fn check_cyclic_tasks(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        check_offline(&self.name, &mut self.offline, &self.mqtt, ctx);
        if self.refresh.due(ctx.now) {
            self.publish_state(ctx);
        }
        Ok(())
    }
}

impl Device for OpeningSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        self.storage.load(ctx.now);
        self.last_value = self.storage.get(keys::LAST_VALUE);
        self.last_value_since = self.storage.get(keys::LAST_VALUE_SINCE);
        self.last_observation = self.storage.get(keys::LAST_OBSERVATION);
        self.last_error = self.storage.get(keys::LAST_ERROR);
        self.last_error_since = self.storage.get(keys::LAST_ERROR_SINCE);
        if let Some(state) = self.last_value {
            debug!("[{}] Restored state {}", self.name, state);
        }
        self.offline.start(ctx.now);
        self.refresh.schedule(ctx.now);
        Ok(())
    }

    fn close(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        self.mqtt.publish_last_will(ctx);
        self.storage.save();
        Ok(())
    }

    fn flush_storage(&mut self) {
        self.storage.save();
    }
}
