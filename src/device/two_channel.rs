//! Two-channel switch actor (FSR14-2x style).
//!
//! The actor is driven with rocker telegrams, so every command is a button
//! press followed by a release. Commands arriving while a release is still
//! outstanding wait in a queue.

use super::common::{
    EnoceanBinding, MqttBinding, OfflineWatch, RefreshTimer, check_offline, format_timestamp,
    status_message, storage_from_config,
};
use super::scene::SceneOverlay;
use super::{CyclicTask, Device, DeviceContext, EnoceanHandler, MqttHandler, TimerToken};
use crate::command::{self, Command, NumericMode};
use crate::config::DeviceConfig;
use crate::eep::relay::SwitchState;
use crate::eep::two_channel::{self, CHANNELS, ChannelAction};
use crate::eep::{Telegram, format_id};
use crate::error::{ConfigError, Result};
use crate::storage::{Storage, keys};
use crate::transport::MqttMessage;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Time between a button press and its release.
pub const RELEASE_DELAY: Duration = Duration::from_millis(200);

const RELEASE_TIMER: TimerToken = TimerToken(1);

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    switch_state: Option<SwitchState>,
    since: Option<DateTime<Local>>,
}

pub struct TwoChannelActor {
    name: String,
    enocean: EnoceanBinding,
    mqtt: MqttBinding,
    scenes: SceneOverlay,
    offline: OfflineWatch,
    refresh: RefreshTimer,
    storage: Storage,
    channels: [ChannelState; CHANNELS as usize],
    release_pending: bool,
    queue: VecDeque<ChannelAction>,
    rssi: Option<i32>,
}

fn storage_key(channel: u8) -> String {
    format!("{}_{}", keys::SWITCH_STATE, channel)
}

/// Scenes without a topic drive channel 1.
fn scene_topic(config: &DeviceConfig) -> Option<String> {
    config
        .mqtt_channel_cmd
        .as_ref()
        .map(|base| format!("{base}/1"))
}

impl TwoChannelActor {
    pub fn from_config(config: &DeviceConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            name: config.name.clone(),
            enocean: EnoceanBinding::from_config(config)?,
            mqtt: MqttBinding::from_config(config, true)?,
            scenes: SceneOverlay::with_default_topic(config, scene_topic(config))?,
            offline: OfflineWatch::from_config(config),
            refresh: RefreshTimer::from_config(config),
            storage: storage_from_config(config),
            channels: Default::default(),
            release_pending: false,
            queue: VecDeque::new(),
            rssi: None,
        })
    }

    pub fn switch_state(&self, channel: u8) -> Option<SwitchState> {
        self.channel(channel).and_then(|c| c.switch_state)
    }

    fn channel(&self, channel: u8) -> Option<&ChannelState> {
        self.channels.get(usize::from(channel).checked_sub(1)?)
    }

    fn channel_mut(&mut self, channel: u8) -> Option<&mut ChannelState> {
        self.channels.get_mut(usize::from(channel).checked_sub(1)?)
    }

    fn command_topic(&self, channel: u8) -> Option<String> {
        self.mqtt
            .channel_cmd
            .as_ref()
            .map(|base| format!("{base}/{channel}"))
    }

    fn state_topic(&self, channel: u8) -> String {
        format!("{}/{}", self.mqtt.channel_state, channel)
    }

    fn channel_for_topic(&self, topic: &str) -> Option<u8> {
        (1..=CHANNELS).find(|n| self.command_topic(*n).as_deref() == Some(topic))
    }

    /// Send a press now, or queue it behind the outstanding release.
    fn submit(&mut self, action: ChannelAction, ctx: &mut DeviceContext) -> Result<()> {
        if self.release_pending {
            debug!("[{}] Queueing channel {} {}", self.name, action.channel, action.switch_state);
            self.queue.push_back(action);
            return Ok(());
        }
        self.press(action, ctx)
    }

    fn press(&mut self, action: ChannelAction, ctx: &mut DeviceContext) -> Result<()> {
        let telegram = two_channel::encode(&action, self.enocean.sender(ctx), self.enocean.target)?;
        ctx.send(telegram);
        ctx.schedule(RELEASE_DELAY, RELEASE_TIMER);
        self.release_pending = true;
        Ok(())
    }

    fn publish_channel(&self, channel: u8, ctx: &mut DeviceContext) {
        let Some(state) = self.channel(channel).copied() else {
            return;
        };
        let Some(switch_state) = state.switch_state else {
            return;
        };
        let mut message = status_message(&self.name, ctx.now, self.rssi);
        message.insert("channel".into(), channel.into());
        message.insert("state".into(), switch_state.to_string().into());
        if let Some(since) = state.since {
            message.insert("since".into(), format_timestamp(since).into());
        }
        let topic = self.state_topic(channel);
        self.mqtt
            .publish_to(ctx, &topic, Value::Object(message).to_string());
    }

    fn publish_all(&self, ctx: &mut DeviceContext) {
        for channel in 1..=CHANNELS {
            self.publish_channel(channel, ctx);
        }
    }
}

impl EnoceanHandler for TwoChannelActor {
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

        let action = match two_channel::decode(telegram) {
            Ok(action) => action,
            Err(e) => {
                debug!("[{}] Ignoring telegram from {}: {}", self.name, format_id(telegram.sender), e);
                return Ok(());
            }
        };

        self.offline.seen(ctx.now);
        self.rssi = telegram.rssi;
        let now = ctx.now;
        let Some(state) = self.channel_mut(action.channel) else {
            return Ok(());
        };
        if state.switch_state != Some(action.switch_state) {
            state.since = Some(now);
        }
        state.switch_state = Some(action.switch_state);
        info!("[{}] Channel {} is {}", self.name, action.channel, action.switch_state);
        self.storage
            .set_and_save(&storage_key(action.channel), &action.switch_state, now);
        self.publish_channel(action.channel, ctx);
        Ok(())
    }
}

impl MqttHandler for TwoChannelActor {
    fn mqtt_topics(&self) -> Vec<String> {
        (1..=CHANNELS).filter_map(|n| self.command_topic(n)).collect()
    }

    fn process_mqtt_message(&mut self, message: &MqttMessage, ctx: &mut DeviceContext) -> Result<()> {
        let Some(channel) = self.channel_for_topic(&message.topic) else {
            return Ok(());
        };
        let command = command::parse(message.payload.as_bytes(), NumericMode::Switch)?;
        debug!("[{}] Channel {} command {}", self.name, channel, command);

        let switch_state = match command {
            Command::On => SwitchState::On,
            Command::Off => SwitchState::Off,
            Command::Toggle => self
                .switch_state(channel)
                .map(SwitchState::inverted)
                .unwrap_or(SwitchState::On),
            Command::Learn => {
                info!("[{}] Sending channel {} press for teach-in", self.name, channel);
                SwitchState::On
            }
            Command::Update => {
                self.publish_channel(channel, ctx);
                return Ok(());
            }
            other => {
                warn!("[{}] Unsupported command {}", self.name, other);
                return Ok(());
            }
        };
        self.submit(
            ChannelAction {
                channel,
                switch_state,
            },
            ctx,
        )
    }
}

impl CyclicTask for TwoChannelActor {
    fn check_cyclic_tasks(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        check_offline(&self.name, &mut self.offline, &self.mqtt, ctx);
        if self.refresh.due(ctx.now) {
            self.publish_all(ctx);
        }
        Ok(())
    }
}

impl Device for TwoChannelActor {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        self.storage.load(ctx.now);
        for channel in 1..=CHANNELS {
            let key = storage_key(channel);
            let restored = self.storage.get::<SwitchState>(&key);
            let since = self.storage.entry(&key).map(|e| e.changed);
            if let Some(state) = self.channel_mut(channel) {
                state.switch_state = restored;
                state.since = restored.and(since);
            }
        }
        self.offline.start(ctx.now);
        self.refresh.schedule(ctx.now);
        Ok(())
    }

    fn close(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        if self.release_pending {
            // never leave a button held down
            let telegram = two_channel::encode_release(self.enocean.sender(ctx), self.enocean.target)?;
            ctx.send(telegram);
            self.release_pending = false;
        }
        if !self.queue.is_empty() {
            warn!("[{}] Dropping {} queued commands", self.name, self.queue.len());
            self.queue.clear();
        }
        self.mqtt.publish_last_will(ctx);
        self.storage.save();
        Ok(())
    }

    fn on_timer(&mut self, token: TimerToken, ctx: &mut DeviceContext) -> Result<()> {
        if token != RELEASE_TIMER || !self.release_pending {
            return Ok(());
        }
        let telegram = two_channel::encode_release(self.enocean.sender(ctx), self.enocean.target)?;
        ctx.send(telegram);
        self.release_pending = false;

        if let Some(next) = self.queue.pop_front() {
            self.press(next, ctx)?;
        }
        Ok(())
    }

    fn flush_storage(&mut self) {
        self.storage.save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{TARGET, actor_config, ctx, mqtt, published_json, rocker_press};
    use crate::eep::rocker::{self, RockerButton, RockerPress};

    fn actor() -> TwoChannelActor {
        let mut actor = TwoChannelActor::from_config(&actor_config("fsr14_2x")).unwrap();
        actor.open(&mut ctx()).unwrap();
        actor
    }

    fn decoded(telegram: &Telegram) -> rocker::RockerAction {
        rocker::decode(telegram).unwrap()
    }

    #[test]
    fn test_topics_per_channel() {
        let actor = actor();
        assert_eq!(actor.mqtt_topics(), vec!["test/cmd/1".to_string(), "test/cmd/2".to_string()]);
    }

    #[test]
    fn test_press_then_delayed_release() {
        let mut actor = actor();
        let mut c = ctx();
        actor.process_mqtt_message(&mqtt("test/cmd/1", "on"), &mut c).unwrap();
        assert_eq!(c.telegrams.len(), 1);
        assert!(decoded(&c.telegrams[0]).is_pressed(RockerButton::Rock1));
        assert_eq!(c.telegrams[0].destination, TARGET);
        assert_eq!(c.timers, vec![(RELEASE_DELAY, RELEASE_TIMER)]);

        let mut c = ctx();
        actor.on_timer(RELEASE_TIMER, &mut c).unwrap();
        assert_eq!(c.telegrams.len(), 1);
        assert_eq!(decoded(&c.telegrams[0]).press, RockerPress::Released);
        assert!(c.timers.is_empty());
    }

    #[test]
    fn test_commands_queue_behind_release() {
        let mut actor = actor();
        actor.process_mqtt_message(&mqtt("test/cmd/1", "on"), &mut ctx()).unwrap();

        let mut c = ctx();
        actor.process_mqtt_message(&mqtt("test/cmd/2", "off"), &mut c).unwrap();
        assert!(c.telegrams.is_empty());

        let mut c = ctx();
        actor.on_timer(RELEASE_TIMER, &mut c).unwrap();
        assert_eq!(c.telegrams.len(), 2);
        assert_eq!(decoded(&c.telegrams[0]).press, RockerPress::Released);
        assert!(decoded(&c.telegrams[1]).is_pressed(RockerButton::Rock2));
        assert_eq!(c.timers.len(), 1);

        let mut c = ctx();
        actor.on_timer(RELEASE_TIMER, &mut c).unwrap();
        assert_eq!(c.telegrams.len(), 1);
        let mut c = ctx();
        actor.on_timer(RELEASE_TIMER, &mut c).unwrap();
        assert!(c.telegrams.is_empty());
    }

    #[test]
    fn test_status_per_channel() {
        let mut actor = actor();
        let mut c = ctx();
        actor
            .process_enocean_message(&rocker_press(TARGET, RockerButton::Rock3), &mut c)
            .unwrap();
        let json = published_json(&c, "test/state/2");
        assert_eq!(json["channel"], 2);
        assert_eq!(json["state"], "on");
        assert_eq!(actor.switch_state(2), Some(SwitchState::On));
        assert_eq!(actor.switch_state(1), None);
    }

    #[test]
    fn test_close_releases_held_button() {
        let mut actor = actor();
        actor.process_mqtt_message(&mqtt("test/cmd/2", "on"), &mut ctx()).unwrap();
        let mut c = ctx();
        actor.close(&mut c).unwrap();
        assert_eq!(decoded(&c.telegrams[0]).press, RockerPress::Released);
        assert_eq!(c.publications.len(), 1);
    }

    #[test]
    fn test_unknown_channel_topic_is_ignored() {
        let mut actor = actor();
        let mut c = ctx();
        actor.process_mqtt_message(&mqtt("test/cmd/3", "on"), &mut c).unwrap();
        actor.process_mqtt_message(&mqtt("test/cmd", "on"), &mut c).unwrap();
        assert!(c.telegrams.is_empty());
    }
}
