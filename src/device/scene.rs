//! Scene switches: rocker buttons mapped to MQTT commands.
//!
//! Every device can carry a list of scenes. A telegram from a configured
//! scene switch is consumed by the overlay before the device's own logic
//! sees it, and each matching scene publishes its payload. The standalone
//! [`SceneActor`] is a device with nothing but scenes.

use super::common::{MqttBinding, OfflineWatch, check_offline, status_message};
use super::{CyclicTask, Device, DeviceContext, EnoceanHandler, MqttHandler};
use crate::config::{DeviceConfig, deserialize_id};
use crate::eep::rocker::{self, RockerButton, RockerPress};
use crate::eep::{Telegram, format_id, rorg};
use crate::error::{ConfigError, Result};
use crate::transport::MqttMessage;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(deserialize_with = "deserialize_id")]
    pub switch_id: u32,
    /// Button to react to; any button when unset.
    #[serde(default)]
    pub button: Option<RockerButton>,
    #[serde(default = "default_press")]
    pub press: RockerPress,
    /// Target topic; defaults to the owning device's command channel.
    #[serde(default)]
    pub topic: Option<String>,
    pub payload: String,
}

fn default_press() -> RockerPress {
    RockerPress::Pressed
}

impl SceneConfig {
    fn matches(&self, press: RockerPress, buttons: &[RockerButton]) -> bool {
        if self.press != press {
            return false;
        }
        match self.button {
            None => true,
            Some(button) => buttons.contains(&button),
        }
    }
}

/// Scenes of one device.
#[derive(Debug, Clone, Default)]
pub struct SceneOverlay {
    scenes: Vec<SceneConfig>,
    default_topic: Option<String>,
}

impl SceneOverlay {
    pub fn new(scenes: Vec<SceneConfig>, default_topic: Option<String>) -> Self {
        Self {
            scenes,
            default_topic,
        }
    }

    /// Scenes falling back to the device's command channel.
    pub fn from_config(config: &DeviceConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_default_topic(config, config.mqtt_channel_cmd.clone())
    }

    /// Check that every scene has somewhere to publish.
    pub fn with_default_topic(
        config: &DeviceConfig,
        default_topic: Option<String>,
    ) -> std::result::Result<Self, ConfigError> {
        let overlay = Self::new(config.scenes.clone(), default_topic);
        if overlay.default_topic.is_none() && overlay.scenes.iter().any(|s| s.topic.is_none()) {
            return Err(ConfigError::InvalidValue {
                device: config.name.clone(),
                field: "scenes",
                reason: "scene without topic and no mqtt_channel_cmd to fall back to".into(),
            });
        }
        Ok(overlay)
    }

    /// Distinct switch ids, in configuration order.
    pub fn switch_ids(&self) -> Vec<u32> {
        let mut ids = Vec::new();
        for scene in &self.scenes {
            if !ids.contains(&scene.switch_id) {
                ids.push(scene.switch_id);
            }
        }
        ids
    }

    pub fn is_scene_switch(&self, id: u32) -> bool {
        self.scenes.iter().any(|s| s.switch_id == id)
    }

    /// Consume a telegram from a scene switch. Returns the number of scenes
    /// that fired, or `None` if the telegram is not from a scene switch.
    pub fn process(
        &self,
        device: &str,
        telegram: &Telegram,
        mqtt: &MqttBinding,
        ctx: &mut DeviceContext,
    ) -> Option<usize> {
        if !self.is_scene_switch(telegram.sender) {
            return None;
        }
        if !telegram.is_radio() || telegram.rorg() != Some(rorg::RPS) {
            return Some(0);
        }
        let action = match rocker::decode(telegram) {
            Ok(action) => action,
            Err(e) => {
                debug!("[{}] Ignoring scene telegram from {}: {}", device, format_id(telegram.sender), e);
                return Some(0);
            }
        };
        let buttons: Vec<RockerButton> = action.button.into_iter().chain(action.second_button).collect();

        let mut fired = 0;
        for scene in self
            .scenes
            .iter()
            .filter(|s| s.switch_id == telegram.sender && s.matches(action.press, &buttons))
        {
            let Some(topic) = scene.topic.as_deref().or(self.default_topic.as_deref()) else {
                continue;
            };
            info!(
                "[{}] Scene {} {:?} {}: {} -> {}",
                device,
                format_id(scene.switch_id),
                scene.button,
                scene.press,
                topic,
                scene.payload
            );
            mqtt.publish_to(ctx, topic, scene.payload.clone());
            fired += 1;
        }
        Some(fired)
    }
}

/// A device that only maps scene switches to MQTT commands.
pub struct SceneActor {
    name: String,
    mqtt: MqttBinding,
    scenes: SceneOverlay,
    offline: OfflineWatch,
}

impl SceneActor {
    pub fn from_config(config: &DeviceConfig) -> std::result::Result<Self, ConfigError> {
        if config.scenes.is_empty() {
            return Err(ConfigError::MissingField {
                device: config.name.clone(),
                field: "scenes",
            });
        }
        Ok(Self {
            name: config.name.clone(),
            mqtt: MqttBinding::from_config(config, false)?,
            scenes: SceneOverlay::from_config(config)?,
            offline: OfflineWatch::from_config(config),
        })
    }
}

impl EnoceanHandler for SceneActor {
    fn enocean_ids(&self) -> Vec<u32> {
        self.scenes.switch_ids()
    }

    fn process_enocean_message(&mut self, telegram: &Telegram, ctx: &mut DeviceContext) -> Result<()> {
        if let Some(fired) = self.scenes.process(&self.name, telegram, &self.mqtt, ctx) {
            self.offline.seen(ctx.now);
            if fired > 0 {
                let mut message = status_message(&self.name, ctx.now, telegram.rssi);
                message.insert("switch".into(), format_id(telegram.sender).into());
                message.insert("scenes".into(), fired.into());
                self.mqtt.publish_json(ctx, &message.into());
            }
        }
        Ok(())
    }
}

impl MqttHandler for SceneActor {
    fn mqtt_topics(&self) -> Vec<String> {
        Vec::new()
    }

    fn process_mqtt_message(&mut self, _message: &MqttMessage, _ctx: &mut DeviceContext) -> Result<()> {
        Ok(())
    }
}

impl CyclicTask for SceneActor {
    fn check_cyclic_tasks(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        check_offline(&self.name, &mut self.offline, &self.mqtt, ctx);
        Ok(())
    }
}

impl Device for SceneActor {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        self.offline.start(ctx.now);
        Ok(())
    }

    fn close(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        self.mqtt.publish_last_will(ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{SCENE_SWITCH, actor_config, ctx, rocker_press, rocker_release};

    fn scene(button: Option<RockerButton>, press: RockerPress, payload: &str) -> SceneConfig {
        SceneConfig {
            switch_id: SCENE_SWITCH,
            button,
            press,
            topic: None,
            payload: payload.into(),
        }
    }

    fn binding() -> MqttBinding {
        MqttBinding::from_config(&actor_config("scene"), false).unwrap()
    }

    #[test]
    fn test_scene_publishes_to_default_topic() {
        let overlay = SceneOverlay::new(
            vec![
                scene(Some(RockerButton::Rock3), RockerPress::Pressed, "open"),
                scene(Some(RockerButton::Rock2), RockerPress::Pressed, "close"),
            ],
            Some("test/cmd".into()),
        );
        let mut ctx = ctx();
        let fired = overlay.process("s", &rocker_press(SCENE_SWITCH, RockerButton::Rock3), &binding(), &mut ctx);
        assert_eq!(fired, Some(1));
        assert_eq!(ctx.publications.len(), 1);
        assert_eq!(ctx.publications[0].topic, "test/cmd");
        assert_eq!(ctx.publications[0].payload, "open");
    }

    #[test]
    fn test_release_scene() {
        let overlay = SceneOverlay::new(
            vec![scene(None, RockerPress::Released, "stop")],
            Some("test/cmd".into()),
        );
        let mut ctx = ctx();
        assert_eq!(
            overlay.process("s", &rocker_press(SCENE_SWITCH, RockerButton::Rock0), &binding(), &mut ctx),
            Some(0)
        );
        assert_eq!(overlay.process("s", &rocker_release(SCENE_SWITCH), &binding(), &mut ctx), Some(1));
        assert_eq!(ctx.publications[0].payload, "stop");
    }

    #[test]
    fn test_other_senders_pass_through() {
        let overlay = SceneOverlay::new(vec![scene(None, RockerPress::Pressed, "on")], None);
        let mut ctx = ctx();
        assert_eq!(
            overlay.process("s", &rocker_press(0x0100_0001, RockerButton::Rock1), &binding(), &mut ctx),
            None
        );
        assert!(ctx.publications.is_empty());
    }

    #[test]
    fn test_scene_without_topic_needs_command_channel() {
        let mut config = actor_config("fsr61");
        config.mqtt_channel_cmd = None;
        config.scenes = vec![scene(None, RockerPress::Pressed, "on")];
        assert!(SceneOverlay::from_config(&config).is_err());

        config.scenes[0].topic = Some("other/cmd".into());
        assert!(SceneOverlay::from_config(&config).is_ok());
    }

    #[test]
    fn test_scene_actor() {
        let mut config = actor_config("scene");
        assert!(SceneActor::from_config(&config).is_err());

        config.scenes = vec![scene(Some(RockerButton::Rock1), RockerPress::Pressed, "toggle")];
        let mut actor = SceneActor::from_config(&config).unwrap();
        assert_eq!(actor.enocean_ids(), vec![SCENE_SWITCH]);

        let mut ctx = ctx();
        actor
            .process_enocean_message(&rocker_press(SCENE_SWITCH, RockerButton::Rock1), &mut ctx)
            .unwrap();
        let topics: Vec<_> = ctx.publications.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, vec!["test/cmd", "test/state"]);
    }

    #[test]
    fn test_scene_config_from_yaml() {
        let yaml = "switch_id: \"FE:F1:12:34\"\nbutton: rock2\npayload: \"50\"\n";
        let scene: SceneConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(scene.switch_id, SCENE_SWITCH);
        assert_eq!(scene.button, Some(RockerButton::Rock2));
        assert_eq!(scene.press, RockerPress::Pressed);
    }
}
