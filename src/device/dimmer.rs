//! Dimmer actor (FUD61 style).

use super::common::{
    EnoceanBinding, MqttBinding, OfflineWatch, RefreshTimer, check_offline, format_timestamp,
    status_message, storage_from_config,
};
use super::scene::SceneOverlay;
use super::{CyclicTask, Device, DeviceContext, EnoceanHandler, MqttHandler};
use crate::command::{self, Command, NumericMode};
use crate::config::DeviceConfig;
use crate::eep::dimmer::{self, DEFAULT_DIM_STATE, DimmerAction};
use crate::eep::relay::SwitchState;
use crate::eep::{Telegram, format_id};
use crate::error::{ConfigError, Result};
use crate::storage::{Storage, keys};
use crate::transport::MqttMessage;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde_json::Value;

pub struct DimmerActor {
    name: String,
    enocean: EnoceanBinding,
    mqtt: MqttBinding,
    scenes: SceneOverlay,
    offline: OfflineWatch,
    refresh: RefreshTimer,
    storage: Storage,
    switch_state: Option<SwitchState>,
    /// Last brightness reported by the dimmer.
    last_dim_state: Option<u8>,
    /// Brightness restored by a plain ON.
    restore_dim_state: u8,
    since: Option<DateTime<Local>>,
    rssi: Option<i32>,
}

impl DimmerActor {
    pub fn from_config(config: &DeviceConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            name: config.name.clone(),
            enocean: EnoceanBinding::from_config(config)?,
            mqtt: MqttBinding::from_config(config, true)?,
            scenes: SceneOverlay::from_config(config)?,
            offline: OfflineWatch::from_config(config),
            refresh: RefreshTimer::from_config(config),
            storage: storage_from_config(config),
            switch_state: None,
            last_dim_state: None,
            restore_dim_state: DEFAULT_DIM_STATE,
            since: None,
            rssi: None,
        })
    }

    pub fn last_dim_state(&self) -> Option<u8> {
        self.last_dim_state
    }

    pub fn switch_state(&self) -> Option<SwitchState> {
        self.switch_state
    }

    fn send(&self, action: DimmerAction, ctx: &mut DeviceContext) -> Result<()> {
        let telegram = dimmer::encode(&action, self.enocean.sender(ctx), self.enocean.target)?;
        ctx.send(telegram);
        Ok(())
    }

    fn update_state(&mut self, action: &DimmerAction, now: DateTime<Local>) {
        // A switched-off dimmer may still report its last level.
        let dim_state = if action.switch_state.is_on() {
            action.dim_state
        } else {
            0
        };
        if self.switch_state != Some(action.switch_state) {
            self.since = Some(now);
            self.storage.set(keys::LAST_VALUE_SINCE, &format_timestamp(now), now);
        }
        self.switch_state = Some(action.switch_state);
        self.last_dim_state = Some(dim_state);
        if dim_state > 0 {
            self.restore_dim_state = dim_state;
        }
        self.storage.set(keys::SWITCH_STATE, &action.switch_state, now);
        self.storage.set(keys::DIM_STATE, &self.restore_dim_state, now);
        self.storage.save();
    }

    fn publish_state(&self, ctx: &mut DeviceContext) {
        let (Some(state), Some(dim_state)) = (self.switch_state, self.last_dim_state) else {
            debug!("[{}] State unknown, nothing to publish", self.name);
            return;
        };
        let mut message = status_message(&self.name, ctx.now, self.rssi);
        message.insert("state".into(), state.to_string().into());
        message.insert("dim_state".into(), dim_state.into());
        if let Some(since) = self.since {
            message.insert("since".into(), format_timestamp(since).into());
        }
        self.mqtt.publish_json(ctx, &Value::Object(message));
    }
}

impl EnoceanHandler for DimmerActor {
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

        let action = match dimmer::decode(telegram) {
            Ok(action) => action,
            Err(e) => {
                debug!("[{}] Ignoring telegram from {}: {}", self.name, format_id(telegram.sender), e);
                return Ok(());
            }
        };

        self.offline.seen(ctx.now);
        self.rssi = telegram.rssi;
        info!("[{}] Dimmer is {} at {}%", self.name, action.switch_state, action.dim_state);
        self.update_state(&action, ctx.now);
        self.publish_state(ctx);
        Ok(())
    }
}

impl MqttHandler for DimmerActor {
    fn mqtt_topics(&self) -> Vec<String> {
        self.mqtt.topics()
    }

    fn process_mqtt_message(&mut self, message: &MqttMessage, ctx: &mut DeviceContext) -> Result<()> {
        if !self.mqtt.is_command(&message.topic) {
            return Ok(());
        }
        let command = command::parse(message.payload.as_bytes(), NumericMode::Dim)?;
        debug!("[{}] Command {}", self.name, command);

        match command {
            Command::Dim(value) => self.send(DimmerAction::dim(value), ctx)?,
            Command::On => self.send(DimmerAction::dim(self.restore_dim_state), ctx)?,
            Command::Off => self.send(DimmerAction::off(), ctx)?,
            Command::Toggle => {
                let action = if self.switch_state.is_some_and(SwitchState::is_on) {
                    DimmerAction::off()
                } else {
                    DimmerAction::dim(self.restore_dim_state)
                };
                self.send(action, ctx)?;
            }
            Command::Learn => {
                info!("[{}] Sending teach-in telegram", self.name);
                self.send(DimmerAction::learn(), ctx)?;
            }
            Command::Update => self.publish_state(ctx),
            other => warn!("[{}] Unsupported command {}", self.name, other),
        }
        Ok(())
    }
}

impl CyclicTask for DimmerActor {
    fn check_cyclic_tasks(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        check_offline(&self.name, &mut self.offline, &self.mqtt, ctx);
        if self.refresh.due(ctx.now) {
            self.publish_state(ctx);
        }
        Ok(())
    }
}

impl Device for DimmerActor {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        self.storage.load(ctx.now);
        if let Some(level) = self.storage.get::<u8>(keys::DIM_STATE)
            && (1..=100).contains(&level)
        {
            self.restore_dim_state = level;
        }
        if let Some(state) = self.storage.get::<SwitchState>(keys::SWITCH_STATE) {
            self.switch_state = Some(state);
            self.last_dim_state = Some(if state.is_on() { self.restore_dim_state } else { 0 });
            self.since = self.storage.get::<DateTime<Local>>(keys::LAST_VALUE_SINCE);
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
