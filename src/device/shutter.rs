//! Shutter actor (FSB61 style) with position estimation.
//!
//! The actor only understands timed OPEN/CLOSE runs. Positions are reached
//! either by a direct run from the estimated position, or, when the estimate
//! is missing or has drifted, by a run into an end stop followed by a second
//! run to the target. The second command is only sent once the actor confirms
//! the first run with a matching OPENED/CLOSED report.

use super::common::{
    EnoceanBinding, MqttBinding, OfflineWatch, RefreshTimer, check_offline, elapsed,
    status_message,
};
use super::scene::SceneOverlay;
use super::{CyclicTask, Device, DeviceContext, EnoceanHandler, MqttHandler};
use crate::command::{self, Command, NumericMode};
use crate::config::DeviceConfig;
use crate::eep::shutter::{self, Direction, ShutterCommand, ShutterStatus, ShutterStatusKind};
use crate::eep::{Telegram, format_id};
use crate::error::{ConfigError, Result};
use crate::shutter_position::{
    MIN_SEEK_TIME, PositionState, ShutterPosition, ShutterTimings, check_drive_time,
};
use crate::storage::{Storage, keys};
use crate::transport::MqttMessage;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde_json::Value;

/// Relative tolerance when matching the first run's report.
const SEQUENCE_TOLERANCE: f64 = 0.1;

/// Lower bound of the tolerance in seconds.
const MIN_SEQUENCE_TOLERANCE: f64 = 1.0;

/// Second half of a positioning run, waiting for the end stop.
#[derive(Debug, Clone, Copy)]
struct PendingSeek {
    first: ShutterCommand,
    second: ShutterCommand,
    issued_at: DateTime<Local>,
}

impl PendingSeek {
    fn expected_time(&self) -> f64 {
        self.first.time().unwrap_or_default()
    }

    fn tolerance(&self) -> f64 {
        (self.expected_time() * SEQUENCE_TOLERANCE).max(MIN_SEQUENCE_TOLERANCE)
    }
}

/// Last movement we know of, used to interpret a bare STOPPED report.
#[derive(Debug, Clone, Copy)]
struct Motion {
    direction: Direction,
    since: DateTime<Local>,
}

fn opposite(direction: Direction) -> Direction {
    match direction {
        Direction::Up => Direction::Down,
        Direction::Down => Direction::Up,
    }
}

fn end_position(direction: Direction) -> f64 {
    match direction {
        Direction::Up => 0.0,
        Direction::Down => 100.0,
    }
}

pub struct ShutterActor {
    name: String,
    enocean: EnoceanBinding,
    mqtt: MqttBinding,
    scenes: SceneOverlay,
    offline: OfflineWatch,
    refresh: RefreshTimer,
    storage: Storage,
    position: ShutterPosition,
    status: Option<ShutterStatusKind>,
    pending: Option<PendingSeek>,
    motion: Option<Motion>,
    rssi: Option<i32>,
}

impl ShutterActor {
    pub fn from_config(config: &DeviceConfig) -> std::result::Result<Self, ConfigError> {
        let timings = ShutterTimings {
            time_up_driving: config.require_seconds("time_up_driving", config.time_up_driving)?,
            time_up_rolling: config.require_seconds("time_up_rolling", config.time_up_rolling)?,
            time_down_driving: config
                .require_seconds("time_down_driving", config.time_down_driving)?,
            time_down_rolling: config
                .require_seconds("time_down_rolling", config.time_down_rolling)?,
        };
        let storage_file = config.require_storage_file()?;
        let position = ShutterPosition::new(timings);
        for direction in [Direction::Up, Direction::Down] {
            if position.end_stop_time(direction).is_err() {
                return Err(ConfigError::InvalidValue {
                    device: config.name.clone(),
                    field: "time_*",
                    reason: format!("full {direction} run does not fit into one command"),
                });
            }
        }

        Ok(Self {
            name: config.name.clone(),
            enocean: EnoceanBinding::from_config(config)?,
            mqtt: MqttBinding::from_config(config, true)?,
            scenes: SceneOverlay::from_config(config)?,
            offline: OfflineWatch::from_config(config),
            refresh: RefreshTimer::from_config(config),
            storage: Storage::new(Some(storage_file), config.storage_max_age()),
            position,
            status: None,
            pending: None,
            motion: None,
            rssi: None,
        })
    }

    pub fn position(&self) -> Option<f64> {
        self.position.position()
    }

    /// Command waiting for the end stop, if a positioning run is underway.
    pub fn pending_command(&self) -> Option<ShutterCommand> {
        self.pending.map(|p| p.second)
    }

    /// Commands that move the shutter to `target` percent.
    pub fn plan_position(&self, target: f64) -> Result<Vec<ShutterCommand>> {
        let target = target.clamp(0.0, 100.0);

        if target <= 0.0 || target >= 100.0 {
            let direction = if target <= 0.0 { Direction::Up } else { Direction::Down };
            let time = self.position.end_stop_time(direction)?;
            return Ok(vec![ShutterCommand::drive(direction, time)]);
        }

        if !self.position.needs_calibration()
            && let Some(current) = self.position.position()
        {
            let time = self.position.calc_seek_time(current, target);
            if time < MIN_SEEK_TIME {
                return Ok(Vec::new());
            }
            let direction = if target < current { Direction::Up } else { Direction::Down };
            return Ok(vec![ShutterCommand::drive(direction, check_drive_time(time)?)]);
        }

        let via = match self.position.position() {
            Some(current) if target < current => Direction::Up,
            Some(_) => Direction::Down,
            None => {
                let from_top = self.position.calc_seek_time(0.0, target);
                let from_bottom = self.position.calc_seek_time(100.0, target);
                if from_top <= from_bottom { Direction::Up } else { Direction::Down }
            }
        };
        let first = ShutterCommand::drive(via, self.position.end_stop_time(via)?);
        let back = self.position.calc_seek_time(end_position(via), target);
        if back < MIN_SEEK_TIME {
            return Ok(vec![first]);
        }
        let second = ShutterCommand::drive(opposite(via), check_drive_time(back)?);
        Ok(vec![first, second])
    }

    fn send_command(&mut self, command: ShutterCommand, ctx: &mut DeviceContext) -> Result<()> {
        let telegram = shutter::encode(&command, self.enocean.sender(ctx), self.enocean.target)?;
        ctx.send(telegram);
        if let Some(direction) = command.direction() {
            self.motion = Some(Motion {
                direction,
                since: ctx.now,
            });
        }
        Ok(())
    }

    fn move_to(&mut self, target: f64, ctx: &mut DeviceContext) -> Result<()> {
        let commands = self.plan_position(target)?;
        match commands.as_slice() {
            [] => debug!("[{}] Already at {}%", self.name, target),
            [single] => {
                info!("[{}] Moving to {}%: {:?}", self.name, target, single);
                self.send_command(*single, ctx)?;
            }
            [first, second, ..] => {
                info!(
                    "[{}] Moving to {}% via end stop: {:?} then {:?}",
                    self.name, target, first, second
                );
                self.send_command(*first, ctx)?;
                self.pending = Some(PendingSeek {
                    first: *first,
                    second: *second,
                    issued_at: ctx.now,
                });
            }
        }
        Ok(())
    }

    /// Send the second command if the report confirms the first run.
    fn continue_sequence(
        &mut self,
        direction: Direction,
        reported: Option<f64>,
        ctx: &mut DeviceContext,
    ) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        if pending.first.direction() != Some(direction) {
            warn!(
                "[{}] Shutter moved {} instead of finishing {:?}, positioning aborted",
                self.name, direction, pending.first
            );
            return Ok(());
        }

        let expected = pending.expected_time();
        let tolerance = pending.tolerance();
        let took = elapsed(pending.issued_at, ctx.now).as_secs_f64();
        if (took - expected).abs() > tolerance {
            warn!(
                "[{}] End stop after {:.1}s, expected {:.1}s, positioning aborted",
                self.name, took, expected
            );
            return Ok(());
        }
        if let Some(reported) = reported
            && (reported - expected).abs() > tolerance
        {
            warn!(
                "[{}] Actor reported {:.1}s, expected {:.1}s, positioning aborted",
                self.name, reported, expected
            );
            return Ok(());
        }

        info!("[{}] End stop reached, sending {:?}", self.name, pending.second);
        self.send_command(pending.second, ctx)
    }

    fn handle_status(&mut self, status: ShutterStatus, ctx: &mut DeviceContext) -> Result<()> {
        let now = ctx.now;
        match status.kind {
            ShutterStatusKind::Opening | ShutterStatusKind::Closing => {
                if let Some(direction) = status.direction() {
                    self.motion = Some(Motion {
                        direction,
                        since: now,
                    });
                }
            }
            ShutterStatusKind::Opened | ShutterStatusKind::Closed => {
                if let Some(direction) = status.direction() {
                    if status.end_stop {
                        self.position.end_stop(direction);
                    } else if let Some(time) = status.time {
                        self.position.drive(direction, time);
                    }
                    self.motion = None;
                    self.continue_sequence(direction, status.time, ctx)?;
                }
            }
            ShutterStatusKind::Stopped => match self.motion.take() {
                Some(motion) => {
                    let time = elapsed(motion.since, now).as_secs_f64();
                    debug!(
                        "[{}] Stopped after {:.1}s moving {}",
                        self.name, time, motion.direction
                    );
                    self.position.drive(motion.direction, time);
                    self.continue_sequence(motion.direction, None, ctx)?;
                }
                None => info!(
                    "[{}] Stopped without a known direction, position unchanged",
                    self.name
                ),
            },
            ShutterStatusKind::Position => {
                if let Some(position) = status.position
                    && let Err(e) = self.position.set_position(position)
                {
                    warn!("[{}] {}", self.name, e);
                }
            }
        }

        self.status = Some(status.kind);
        self.storage.set_and_save(keys::POSITION, &self.position.state(), now);
        self.publish_state(ctx);
        Ok(())
    }

    fn publish_state(&self, ctx: &mut DeviceContext) {
        let mut message = status_message(&self.name, ctx.now, self.rssi);
        let status = self
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        message.insert("status".into(), status.into());
        message.insert(
            "value".into(),
            self.position
                .position()
                .map(|p| Value::from(p.round() as i64))
                .unwrap_or(Value::Null),
        );
        self.mqtt.publish_json(ctx, &Value::Object(message));
    }
}

impl EnoceanHandler for ShutterActor {
    fn enocean_ids(&self) -> Vec<u32> {
        let mut ids = vec![self.enocean.target];
        ids.extend(self.scenes.switch_ids());
        ids
    }

    fn process_enocean_message(&mut self, telegram: &Telegram, ctx: &mut DeviceContext) -> Result<()> {
        if let Some(fired) = self.scenes.process(&self.name, telegram, &self.mqtt, ctx) {
            if fired > 0 && self.pending.take().is_some() {
                info!("[{}] Scene switch cancelled the positioning run", self.name);
            }
            return Ok(());
        }
        if telegram.sender != self.enocean.target || !telegram.is_radio() {
            return Ok(());
        }

        let status = match shutter::decode_status(telegram) {
            Ok(status) => status,
            Err(e) => {
                debug!("[{}] Ignoring telegram from {}: {}", self.name, format_id(telegram.sender), e);
                return Ok(());
            }
        };

        self.offline.seen(ctx.now);
        self.rssi = telegram.rssi;
        debug!("[{}] Status {:?}", self.name, status);
        self.handle_status(status, ctx)
    }
}

impl MqttHandler for ShutterActor {
    fn mqtt_topics(&self) -> Vec<String> {
        self.mqtt.topics()
    }

    fn process_mqtt_message(&mut self, message: &MqttMessage, ctx: &mut DeviceContext) -> Result<()> {
        if !self.mqtt.is_command(&message.topic) {
            return Ok(());
        }
        let command = command::parse(message.payload.as_bytes(), NumericMode::Position)?;
        debug!("[{}] Command {}", self.name, command);

        match command {
            Command::Position(target) => {
                self.pending = None;
                self.move_to(target, ctx)?;
            }
            Command::Stop => {
                self.pending = None;
                self.send_command(ShutterCommand::Stop, ctx)?;
            }
            Command::Update => {
                self.send_command(ShutterCommand::StatusRequest, ctx)?;
                self.publish_state(ctx);
            }
            Command::Learn => {
                info!("[{}] Sending teach-in telegram", self.name);
                self.send_command(ShutterCommand::Learn, ctx)?;
            }
            other => warn!("[{}] Unsupported command {}", self.name, other),
        }
        Ok(())
    }
}

impl CyclicTask for ShutterActor {
    fn check_cyclic_tasks(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        check_offline(&self.name, &mut self.offline, &self.mqtt, ctx);

        if let Some(pending) = self.pending {
            let waited = elapsed(pending.issued_at, ctx.now).as_secs_f64();
            if waited > pending.expected_time() + pending.tolerance() {
                warn!(
                    "[{}] No end stop report after {:.0}s, positioning aborted",
                    self.name, waited
                );
                self.pending = None;
            }
        }

        if self.refresh.due(ctx.now) {
            self.send_command(ShutterCommand::StatusRequest, ctx)?;
        }
        Ok(())
    }
}

impl Device for ShutterActor {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        self.storage.load(ctx.now);
        if let Some(state) = self.storage.get::<PositionState>(keys::POSITION) {
            self.position.restore(state);
            debug!("[{}] Restored position {:?}", self.name, self.position.position());
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::scene::SceneConfig;
    use crate::device::testing::{
        SCENE_SWITCH, TARGET, actor_config, ctx_at, mqtt, published_json, rocker_press,
    };
    use crate::eep::rocker::{RockerButton, RockerPress};
    use crate::eep::{BROADCAST_ID, rorg};
    use chrono::TimeDelta;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> DeviceConfig {
        let mut config = actor_config("fsb61");
        config.storage_file = Some(dir.path().join("shutter.json"));
        config.time_up_driving = Some(18.0);
        config.time_up_rolling = Some(4.5);
        config.time_down_driving = Some(16.0);
        config.time_down_rolling = Some(4.0);
        config
    }

    fn actor(dir: &TempDir, t0: DateTime<Local>) -> ShutterActor {
        let mut shutter = ShutterActor::from_config(&config(dir)).unwrap();
        shutter.open(&mut ctx_at(t0)).unwrap();
        shutter
    }

    fn at(t0: DateTime<Local>, millis: i64) -> DateTime<Local> {
        t0 + TimeDelta::milliseconds(millis)
    }

    fn end_stop_top() -> Telegram {
        Telegram::new(rorg::RPS, &[0x70], TARGET, BROADCAST_ID)
    }

    fn end_stop_bottom() -> Telegram {
        Telegram::new(rorg::RPS, &[0x50], TARGET, BROADCAST_ID)
    }

    /// Status report as the actor sends it after a timed run.
    fn report(command: ShutterCommand) -> Telegram {
        shutter::encode(&command, TARGET, BROADCAST_ID).unwrap()
    }

    fn sent(ctx: &DeviceContext) -> Vec<ShutterCommand> {
        ctx.telegrams
            .iter()
            .map(|t| shutter::decode_command(t).unwrap())
            .collect()
    }

    #[test]
    fn test_missing_timing_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.time_down_rolling = None;
        assert!(ShutterActor::from_config(&config).is_err());
    }

    #[test]
    fn test_requires_storage_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.storage_file = None;
        assert!(matches!(
            ShutterActor::from_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_position_written_on_status() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);
        let path = dir.path().join("shutter.json");
        assert!(!path.exists());

        shutter.process_enocean_message(&end_stop_bottom(), &mut ctx_at(t0)).unwrap();
        assert!(path.exists());

        let mut storage = Storage::new(Some(path), None);
        storage.load(t0);
        let state = storage.get::<PositionState>(keys::POSITION).unwrap();
        assert_eq!(state.position, Some(100.0));
    }

    #[test]
    fn test_end_positions_use_single_command_with_reserve() {
        let dir = tempfile::tempdir().unwrap();
        let shutter = actor(&dir, Local::now());
        assert_eq!(
            shutter.plan_position(0.0).unwrap(),
            vec![ShutterCommand::Open { time: 25.5 }]
        );
        assert_eq!(
            shutter.plan_position(100.0).unwrap(),
            vec![ShutterCommand::Close { time: 23.0 }]
        );
    }

    #[test]
    fn test_calibrated_direct_seek() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);
        shutter.process_enocean_message(&end_stop_top(), &mut ctx_at(t0)).unwrap();
        assert_eq!(shutter.position(), Some(0.0));

        // 50% of the 90% driving phase, 16s down
        assert_eq!(
            shutter.plan_position(50.0).unwrap(),
            vec![ShutterCommand::Close { time: 8.9 }]
        );
        assert!(shutter.plan_position(0.001).unwrap().is_empty());
    }

    #[test]
    fn test_uncalibrated_goes_through_nearer_end_stop() {
        let dir = tempfile::tempdir().unwrap();
        let shutter = actor(&dir, Local::now());
        assert_eq!(
            shutter.plan_position(50.0).unwrap(),
            vec![
                ShutterCommand::Open { time: 25.5 },
                ShutterCommand::Close { time: 8.9 }
            ]
        );
        // 95% is closer from the bottom
        assert_eq!(
            shutter.plan_position(95.0).unwrap(),
            vec![
                ShutterCommand::Close { time: 23.0 },
                ShutterCommand::Open { time: 2.3 }
            ]
        );
    }

    #[test]
    fn test_drifted_estimate_recalibrates_in_travel_direction() {
        let dir = tempfile::tempdir().unwrap();
        let mut shutter = actor(&dir, Local::now());
        shutter.position.restore(PositionState {
            position: Some(30.0),
            jumps: 5,
            calibration_time: 0.0,
        });
        let plan = shutter.plan_position(60.0).unwrap();
        assert_eq!(plan[0], ShutterCommand::Close { time: 23.0 });
        assert_eq!(plan[1].direction(), Some(Direction::Up));

        let plan = shutter.plan_position(10.0).unwrap();
        assert_eq!(plan[0], ShutterCommand::Open { time: 25.5 });
        assert_eq!(plan[1].direction(), Some(Direction::Down));
    }

    #[test]
    fn test_two_step_sequence_completes() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);

        let mut c = ctx_at(t0);
        shutter.process_mqtt_message(&mqtt("test/cmd", "50"), &mut c).unwrap();
        assert_eq!(sent(&c), vec![ShutterCommand::Open { time: 25.5 }]);
        assert_eq!(shutter.pending_command(), Some(ShutterCommand::Close { time: 8.9 }));

        let mut c = ctx_at(at(t0, 25_600));
        shutter
            .process_enocean_message(&report(ShutterCommand::Open { time: 25.5 }), &mut c)
            .unwrap();
        assert_eq!(sent(&c), vec![ShutterCommand::Close { time: 8.9 }]);
        assert_eq!(shutter.pending_command(), None);
        assert_eq!(shutter.position(), Some(0.0));
        assert_eq!(published_json(&c, "test/state")["value"], 0);

        let mut c = ctx_at(at(t0, 34_600));
        shutter
            .process_enocean_message(&report(ShutterCommand::Close { time: 8.9 }), &mut c)
            .unwrap();
        let json = published_json(&c, "test/state");
        assert_eq!(json["status"], "closed");
        assert_eq!(json["value"], 50);
    }

    #[test]
    fn test_two_step_accepts_end_stop_telegram() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);
        shutter.process_mqtt_message(&mqtt("test/cmd", "50"), &mut ctx_at(t0)).unwrap();

        let mut c = ctx_at(at(t0, 24_900));
        shutter.process_enocean_message(&end_stop_top(), &mut c).unwrap();
        assert_eq!(sent(&c), vec![ShutterCommand::Close { time: 8.9 }]);
    }

    #[test]
    fn test_two_step_aborts_on_wrong_direction() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);
        shutter.process_mqtt_message(&mqtt("test/cmd", "50"), &mut ctx_at(t0)).unwrap();

        let mut c = ctx_at(at(t0, 25_500));
        shutter.process_enocean_message(&end_stop_bottom(), &mut c).unwrap();
        assert!(c.telegrams.is_empty());
        assert_eq!(shutter.pending_command(), None);
    }

    #[test]
    fn test_two_step_aborts_on_time_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);
        shutter.process_mqtt_message(&mqtt("test/cmd", "50"), &mut ctx_at(t0)).unwrap();

        let mut c = ctx_at(at(t0, 5_000));
        shutter
            .process_enocean_message(&report(ShutterCommand::Open { time: 5.0 }), &mut c)
            .unwrap();
        assert!(c.telegrams.is_empty());
        assert_eq!(shutter.pending_command(), None);
    }

    #[test]
    fn test_two_step_expires_without_report() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);
        shutter.process_mqtt_message(&mqtt("test/cmd", "50"), &mut ctx_at(t0)).unwrap();

        shutter.check_cyclic_tasks(&mut ctx_at(at(t0, 20_000))).unwrap();
        assert!(shutter.pending_command().is_some());
        shutter.check_cyclic_tasks(&mut ctx_at(at(t0, 40_000))).unwrap();
        assert!(shutter.pending_command().is_none());
    }

    #[test]
    fn test_scene_cancels_pending_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut config = config(&dir);
        config.scenes = vec![SceneConfig {
            switch_id: SCENE_SWITCH,
            button: Some(RockerButton::Rock1),
            press: RockerPress::Pressed,
            topic: None,
            payload: "stop".into(),
        }];
        let mut shutter = ShutterActor::from_config(&config).unwrap();
        shutter.open(&mut ctx_at(t0)).unwrap();
        shutter.process_mqtt_message(&mqtt("test/cmd", "50"), &mut ctx_at(t0)).unwrap();
        assert!(shutter.pending_command().is_some());

        let mut c = ctx_at(at(t0, 2_000));
        shutter
            .process_enocean_message(&rocker_press(SCENE_SWITCH, RockerButton::Rock1), &mut c)
            .unwrap();
        assert!(shutter.pending_command().is_none());
        assert_eq!(c.publications[0].topic, "test/cmd");
        assert_eq!(c.publications[0].payload, "stop");

        let mut c = ctx_at(at(t0, 25_500));
        shutter.process_enocean_message(&end_stop_top(), &mut c).unwrap();
        assert!(c.telegrams.is_empty());
    }

    #[test]
    fn test_stopped_uses_last_direction() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);
        shutter.process_enocean_message(&end_stop_top(), &mut ctx_at(t0)).unwrap();

        shutter.process_mqtt_message(&mqtt("test/cmd", "100"), &mut ctx_at(t0)).unwrap();
        let mut c = ctx_at(at(t0, 8_000));
        shutter.process_enocean_message(&report(ShutterCommand::Stop), &mut c).unwrap();
        // 8s of 16s driving phase
        assert_eq!(shutter.position(), Some(45.0));
        assert_eq!(published_json(&c, "test/state")["status"], "stopped");
    }

    #[test]
    fn test_stopped_without_history_keeps_position() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);
        shutter.process_enocean_message(&end_stop_bottom(), &mut ctx_at(t0)).unwrap();
        shutter
            .process_enocean_message(&report(ShutterCommand::Stop), &mut ctx_at(at(t0, 3_000)))
            .unwrap();
        assert_eq!(shutter.position(), Some(100.0));
    }

    #[test]
    fn test_position_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let t0 = Local::now();

        let mut shutter = ShutterActor::from_config(&config).unwrap();
        shutter.open(&mut ctx_at(t0)).unwrap();
        shutter.process_enocean_message(&end_stop_bottom(), &mut ctx_at(t0)).unwrap();
        shutter.close(&mut ctx_at(t0)).unwrap();

        let mut restarted = ShutterActor::from_config(&config).unwrap();
        restarted.open(&mut ctx_at(t0)).unwrap();
        assert_eq!(restarted.position(), Some(100.0));
    }

    #[test]
    fn test_update_requests_status() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut shutter = actor(&dir, t0);
        let mut c = ctx_at(t0);
        shutter.process_mqtt_message(&mqtt("test/cmd", "update"), &mut c).unwrap();
        assert_eq!(sent(&c), vec![ShutterCommand::StatusRequest]);
        assert_eq!(published_json(&c, "test/state")["value"], Value::Null);
    }
}
