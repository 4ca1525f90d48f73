//! Switching relay actor (FSR61 style).

use super::common::{
    EnoceanBinding, MqttBinding, OfflineWatch, RefreshTimer, check_offline, format_timestamp,
    status_message, storage_from_config,
};
use super::scene::SceneOverlay;
use super::{CyclicTask, Device, DeviceContext, EnoceanHandler, MqttHandler};
use crate::command::{self, Command, NumericMode};
use crate::config::DeviceConfig;
use crate::eep::relay::{self, RelayAction, SwitchState};
use crate::eep::{Telegram, format_id};
use crate::error::{ConfigError, Result};
use crate::storage::{Storage, keys};
use crate::transport::MqttMessage;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde_json::Value;

pub struct RelayActor {
    name: String,
    enocean: EnoceanBinding,
    mqtt: MqttBinding,
    scenes: SceneOverlay,
    offline: OfflineWatch,
    refresh: RefreshTimer,
    storage: Storage,
    switch_state: Option<SwitchState>,
    since: Option<DateTime<Local>>,
    rssi: Option<i32>,
}

impl RelayActor {
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
            since: None,
            rssi: None,
        })
    }

    pub fn switch_state(&self) -> Option<SwitchState> {
        self.switch_state
    }

    fn send(&self, action: RelayAction, ctx: &mut DeviceContext) -> Result<()> {
        let telegram = relay::encode(&action, self.enocean.sender(ctx), self.enocean.target)?;
        ctx.send(telegram);
        Ok(())
    }

    fn update_state(&mut self, state: SwitchState, now: DateTime<Local>) {
        if self.switch_state != Some(state) {
            self.switch_state = Some(state);
            self.since = Some(now);
            self.storage.set(keys::SWITCH_STATE, &state, now);
            self.storage.set(keys::LAST_VALUE_SINCE, &format_timestamp(now), now);
            self.storage.save();
        }
    }

    fn publish_state(&self, ctx: &mut DeviceContext) {
        let Some(state) = self.switch_state else {
            debug!("[{}] State unknown, nothing to publish", self.name);
            return;
        };
        let mut message = status_message(&self.name, ctx.now, self.rssi);
        message.insert("state".into(), state.to_string().into());
        if let Some(since) = self.since {
            message.insert("since".into(), format_timestamp(since).into());
        }
        self.mqtt.publish_json(ctx, &Value::Object(message));
    }
}

impl EnoceanHandler for RelayActor {
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

        let status = match relay::decode(telegram) {
            Ok(status) => status,
            Err(e) => {
                debug!("[{}] Ignoring telegram from {}: {}", self.name, format_id(telegram.sender), e);
                return Ok(());
            }
        };

        self.offline.seen(ctx.now);
        self.rssi = telegram.rssi;
        info!("[{}] Relay is {}", self.name, status.switch_state);
        self.update_state(status.switch_state, ctx.now);
        self.publish_state(ctx);
        Ok(())
    }
}

impl MqttHandler for RelayActor {
    fn mqtt_topics(&self) -> Vec<String> {
        self.mqtt.topics()
    }

    fn process_mqtt_message(&mut self, message: &MqttMessage, ctx: &mut DeviceContext) -> Result<()> {
        if !self.mqtt.is_command(&message.topic) {
            return Ok(());
        }
        let command = command::parse(message.payload.as_bytes(), NumericMode::Switch)?;
        debug!("[{}] Command {}", self.name, command);

        match command {
            Command::On => self.send(RelayAction::switch(SwitchState::On), ctx)?,
            Command::Off => self.send(RelayAction::switch(SwitchState::Off), ctx)?,
            Command::Toggle => {
                let next = self
                    .switch_state
                    .map(SwitchState::inverted)
                    .unwrap_or(SwitchState::On);
                self.send(RelayAction::switch(next), ctx)?;
            }
            Command::Learn => {
                info!("[{}] Sending teach-in telegram", self.name);
                self.send(RelayAction::learn(), ctx)?;
            }
            Command::Update => self.publish_state(ctx),
            other => warn!("[{}] Unsupported command {}", self.name, other),
        }
        Ok(())
    }
}

impl CyclicTask for RelayActor {
    fn check_cyclic_tasks(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        check_offline(&self.name, &mut self.offline, &self.mqtt, ctx);
        if self.refresh.due(ctx.now) {
            self.publish_state(ctx);
        }
        Ok(())
    }
}

impl Device for RelayActor {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        self.storage.load(ctx.now);
        if let Some(state) = self.storage.get::<SwitchState>(keys::SWITCH_STATE) {
            self.switch_state = Some(state);
            self.since = self
                .storage
                .get::<DateTime<Local>>(keys::LAST_VALUE_SINCE)
                .or_else(|| self.storage.entry(keys::SWITCH_STATE).map(|e| e.changed));
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
