//! Routes telegrams and MQTT messages to devices and collects their output.

use crate::device::{Device, DeviceContext, Publication, TimerToken};
use crate::eep::{Telegram, format_id};
use crate::error::{BridgeError, Result};
use crate::scheduler::Scheduler;
use crate::transport::{MqttMessage, RadioContext};
use chrono::{DateTime, Local, TimeDelta};
use log::{debug, error, warn};
use std::collections::HashMap;

/// Everything the devices want sent after one dispatch round.
#[derive(Debug, Default)]
pub struct Outbound {
    pub publications: Vec<Publication>,
    pub telegrams: Vec<Telegram>,
}

impl Outbound {
    pub fn is_empty(&self) -> bool {
        self.publications.is_empty() && self.telegrams.is_empty()
    }
}

pub struct Bridge {
    devices: Vec<Box<dyn Device>>,
    by_sender: HashMap<u32, Vec<usize>>,
    by_topic: HashMap<String, Vec<usize>>,
    timers: Scheduler<(usize, TimerToken)>,
    radio: RadioContext,
}

impl Bridge {
    pub fn new(devices: Vec<Box<dyn Device>>, radio: RadioContext) -> Self {
        let mut by_sender: HashMap<u32, Vec<usize>> = HashMap::new();
        let mut by_topic: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, device) in devices.iter().enumerate() {
            for id in device.enocean_ids() {
                by_sender.entry(id).or_default().push(index);
            }
            for topic in device.mqtt_topics() {
                by_topic.entry(topic).or_default().push(index);
            }
        }
        for (topic, indices) in &by_topic {
            if indices.len() > 1 {
                warn!("{} devices share command topic {}", indices.len(), topic);
            }
        }

        Self {
            devices,
            by_sender,
            by_topic,
            timers: Scheduler::new(),
            radio,
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Topics to subscribe to, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.by_topic.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn open(&mut self, now: DateTime<Local>) -> Outbound {
        self.for_each(now, |device, ctx| device.open(ctx))
    }

    pub fn handle_telegram(&mut self, telegram: &Telegram, now: DateTime<Local>) -> Outbound {
        let mut out = Outbound::default();
        let Some(indices) = self.by_sender.get(&telegram.sender).cloned() else {
            debug!("No device for telegram from {}", format_id(telegram.sender));
            return out;
        };
        for index in indices {
            self.dispatch(index, now, &mut out, |device, ctx| {
                device.process_enocean_message(telegram, ctx)
            });
        }
        out
    }

    pub fn handle_mqtt(&mut self, message: &MqttMessage, now: DateTime<Local>) -> Outbound {
        let mut out = Outbound::default();
        let Some(indices) = self.by_topic.get(&message.topic).cloned() else {
            debug!("No device for MQTT topic {}", message.topic);
            return out;
        };
        for index in indices {
            self.dispatch(index, now, &mut out, |device, ctx| {
                device.process_mqtt_message(message, ctx)
            });
        }
        out
    }

    pub fn run_cyclic(&mut self, now: DateTime<Local>) -> Outbound {
        self.for_each(now, |device, ctx| device.check_cyclic_tasks(ctx))
    }

    /// Fire device timers that are due.
    pub fn fire_timers(&mut self, now: DateTime<Local>) -> Outbound {
        let mut out = Outbound::default();
        for (index, token) in self.timers.pop_due(now) {
            self.dispatch(index, now, &mut out, |device, ctx| device.on_timer(token, ctx));
        }
        out
    }

    #[cfg(test)]
    pub fn next_timer(&self) -> Option<DateTime<Local>> {
        self.timers.next_due()
    }

    pub fn flush_storage(&mut self) {
        for device in &mut self.devices {
            device.flush_storage();
        }
    }

    /// Publish last wills and flush storage of every device.
    pub fn close(&mut self, now: DateTime<Local>) -> Outbound {
        let out = self.for_each(now, |device, ctx| device.close(ctx));
        self.timers.clear();
        out
    }

    fn for_each<F>(&mut self, now: DateTime<Local>, mut f: F) -> Outbound
    where
        F: FnMut(&mut dyn Device, &mut DeviceContext) -> Result<()>,
    {
        let mut out = Outbound::default();
        for index in 0..self.devices.len() {
            self.dispatch(index, now, &mut out, &mut f);
        }
        out
    }

    fn dispatch<F>(&mut self, index: usize, now: DateTime<Local>, out: &mut Outbound, f: F)
    where
        F: FnOnce(&mut dyn Device, &mut DeviceContext) -> Result<()>,
    {
        let Some(device) = self.devices.get_mut(index) else {
            return;
        };
        let mut ctx = DeviceContext::new(now, self.radio);
        if let Err(e) = f(device.as_mut(), &mut ctx) {
            log_device_error(device.name(), &e);
        }

        for (delay, token) in ctx.timers.drain(..) {
            match TimeDelta::from_std(delay) {
                Ok(delta) => self.timers.schedule(now + delta, (index, token)),
                Err(e) => error!("[{}] Invalid timer delay {:?}: {}", device.name(), delay, e),
            }
        }
        out.publications.append(&mut ctx.publications);
        out.telegrams.append(&mut ctx.telegrams);
    }
}

fn log_device_error(device: &str, e: &BridgeError) {
    match e {
        BridgeError::Decode(e) => debug!("[{}] {}", device, e),
        e => error!("[{}] {}", device, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRegistry;
    use crate::device::scene::SceneConfig;
    use crate::device::testing::{BASE_ID, SCENE_SWITCH, TARGET, actor_config, mqtt, rocker_press};
    use crate::device::two_channel::RELEASE_DELAY;
    use crate::eep::dimmer::{self, DimmerAction};
    use crate::eep::rocker::{RockerButton, RockerPress};
    use crate::eep::BROADCAST_ID;
    use crate::config::DeviceConfig;

    const DIMMER: u32 = 0x0581_0001;
    const SWITCH_ACTOR: u32 = 0x0581_0002;

    fn bridge() -> Bridge {
        let registry = DeviceRegistry::with_defaults();
        let mut relay = actor_config("fsr61");
        relay.name = "relay".into();
        relay.mqtt_channel_cmd = Some("home/relay/cmd".into());
        relay.mqtt_channel_state = Some("home/relay".into());

        let mut dimmer = actor_config("fud61");
        dimmer.name = "dimmer".into();
        dimmer.enocean_target = Some(DIMMER);
        dimmer.mqtt_channel_cmd = Some("home/dimmer/cmd".into());
        dimmer.mqtt_channel_state = Some("home/dimmer".into());

        let two_channel = DeviceConfig {
            name: "pair".into(),
            kind: "fsr14_2x".into(),
            enocean_target: Some(SWITCH_ACTOR),
            mqtt_channel_cmd: Some("home/pair/cmd".into()),
            mqtt_channel_state: Some("home/pair".into()),
            ..Default::default()
        };

        let devices = registry.create_all(&[relay, dimmer, two_channel]);
        let mut bridge = Bridge::new(devices, RadioContext { base_id: BASE_ID });
        bridge.open(Local::now());
        bridge
    }

    #[test]
    fn test_subscriptions() {
        let bridge = bridge();
        assert_eq!(
            bridge.subscriptions(),
            vec![
                "home/dimmer/cmd",
                "home/pair/cmd/1",
                "home/pair/cmd/2",
                "home/relay/cmd"
            ]
        );
    }

    #[test]
    fn test_dimmer_end_to_end() {
        let mut bridge = bridge();
        let now = Local::now();

        let out = bridge.handle_mqtt(&mqtt("home/dimmer/cmd", "50"), now);
        assert_eq!(out.telegrams.len(), 1);
        assert!(out.publications.is_empty());
        let sent = dimmer::decode(&out.telegrams[0]).unwrap();
        assert!(sent.switch_state.is_on());
        assert_eq!(sent.dim_state, 50);
        assert_eq!(out.telegrams[0].destination, DIMMER);
        assert_eq!(out.telegrams[0].sender, BASE_ID);

        let status = dimmer::encode(&DimmerAction::dim(50), DIMMER, BROADCAST_ID).unwrap();
        let out = bridge.handle_telegram(&status, now);
        assert!(out.telegrams.is_empty());
        assert_eq!(out.publications.len(), 1);
        assert_eq!(out.publications[0].topic, "home/dimmer");
        let json: serde_json::Value = serde_json::from_str(&out.publications[0].payload).unwrap();
        assert_eq!(json["dim_state"], 50);
    }

    #[test]
    fn test_relay_status_routed_by_sender() {
        let mut bridge = bridge();
        let out = bridge.handle_telegram(&rocker_press(TARGET, RockerButton::Rock3), Local::now());
        assert_eq!(out.publications.len(), 1);
        assert_eq!(out.publications[0].topic, "home/relay");
        assert!(out.publications[0].payload.contains(r#""state":"on""#));

        let out = bridge.handle_telegram(&rocker_press(0x0999_9999, RockerButton::Rock3), Local::now());
        assert!(out.is_empty());
    }

    #[test]
    fn test_parse_errors_do_not_stop_dispatch() {
        let mut bridge = bridge();
        let out = bridge.handle_mqtt(&mqtt("home/dimmer/cmd", "bright"), Local::now());
        assert!(out.is_empty());
        let out = bridge.handle_mqtt(&mqtt("home/dimmer/cmd", "off"), Local::now());
        assert_eq!(out.telegrams.len(), 1);
    }

    #[test]
    fn test_device_timers_fire() {
        let mut bridge = bridge();
        let now = Local::now();
        let out = bridge.handle_mqtt(&mqtt("home/pair/cmd/1", "on"), now);
        assert_eq!(out.telegrams.len(), 1);
        let due = bridge.next_timer().unwrap();
        assert_eq!(due, now + TimeDelta::from_std(RELEASE_DELAY).unwrap());

        assert!(bridge.fire_timers(now).is_empty());
        let out = bridge.fire_timers(due);
        assert_eq!(out.telegrams.len(), 1);
        assert_eq!(out.telegrams[0].destination, SWITCH_ACTOR);
        assert!(bridge.next_timer().is_none());
    }

    #[test]
    fn test_two_channel_scene_reaches_channel_one() {
        let registry = DeviceRegistry::with_defaults();
        let pair = DeviceConfig {
            name: "pair".into(),
            kind: "fsr14_2x".into(),
            enocean_target: Some(SWITCH_ACTOR),
            mqtt_channel_cmd: Some("home/pair/cmd".into()),
            mqtt_channel_state: Some("home/pair".into()),
            scenes: vec![SceneConfig {
                switch_id: SCENE_SWITCH,
                button: None,
                press: RockerPress::Pressed,
                topic: None,
                payload: "on".into(),
            }],
            ..Default::default()
        };
        let mut bridge = Bridge::new(registry.create_all(&[pair]), RadioContext { base_id: BASE_ID });
        let now = Local::now();
        bridge.open(now);

        let out = bridge.handle_telegram(&rocker_press(SCENE_SWITCH, RockerButton::Rock0), now);
        assert_eq!(out.publications.len(), 1);
        let scene = &out.publications[0];
        assert!(bridge.subscriptions().contains(&scene.topic));

        let out = bridge.handle_mqtt(&mqtt(&scene.topic, &scene.payload), now);
        assert_eq!(out.telegrams.len(), 1);
        assert_eq!(out.telegrams[0].destination, SWITCH_ACTOR);
    }

    #[test]
    fn test_close_publishes_last_wills() {
        let mut bridge = bridge();
        let out = bridge.close(Local::now());
        // relay and dimmer carry a last will, the pair does not
        assert_eq!(out.publications.len(), 2);
    }
}
