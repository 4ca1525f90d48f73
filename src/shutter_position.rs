//! Shutter position estimation from motor run times.
//!
//! The actor never reports where the shutter is, only how long the motor
//! ran. Position 0 is fully open, 100 fully closed. Travel is modelled in
//! two linear phases: the driving phase (0 → [`ROLLING`]) moves the whole
//! curtain, the rolling phase ([`ROLLING`] → 100) closes the slats. Each
//! phase has its own duration per direction.

use crate::eep::shutter::{Direction, MAX_DRIVE_TIME};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Position where the rolling (slat) phase begins.
pub const ROLLING: f64 = 90.0;

/// Incremental seeks allowed before a full calibration pass is forced.
pub const CALIBRATION_AFTER_JUMPS: u32 = 5;

/// Extra seconds added to end-stop drives so the motor surely gets there.
pub const TIME_RESERVE: f64 = 3.0;

/// Seeks shorter than this are not worth a radio command.
pub const MIN_SEEK_TIME: f64 = 0.1;

/// Drive durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShutterTimings {
    pub time_up_driving: f64,
    pub time_up_rolling: f64,
    pub time_down_driving: f64,
    pub time_down_rolling: f64,
}

impl ShutterTimings {
    pub fn driving(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Up => self.time_up_driving,
            Direction::Down => self.time_down_driving,
        }
    }

    pub fn rolling(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Up => self.time_up_rolling,
            Direction::Down => self.time_down_rolling,
        }
    }

    /// Time for a full run from one end stop to the other.
    pub fn full(&self, direction: Direction) -> f64 {
        self.driving(direction) + self.rolling(direction)
    }

    /// Map a position to the time needed to reach it from position 0.
    fn to_time(&self, position: f64, direction: Direction) -> f64 {
        let driving = self.driving(direction);
        if position <= ROLLING {
            position / ROLLING * driving
        } else {
            driving + (position - ROLLING) / (100.0 - ROLLING) * self.rolling(direction)
        }
    }

    /// Inverse of [`Self::to_time`], clamped to the valid range.
    fn to_position(&self, time: f64, direction: Direction) -> f64 {
        let driving = self.driving(direction);
        let rolling = self.rolling(direction);
        let time = time.clamp(0.0, driving + rolling);
        if time <= driving {
            if driving <= 0.0 {
                return ROLLING;
            }
            time / driving * ROLLING
        } else if rolling <= 0.0 {
            100.0
        } else {
            ROLLING + (time - driving) / rolling * (100.0 - ROLLING)
        }
    }

    /// Expected drive time from `start` to `end` percent.
    pub fn calc_seek_time(&self, start: f64, end: f64) -> f64 {
        if end < start {
            self.to_time(start, Direction::Up) - self.to_time(end, Direction::Up)
        } else {
            self.to_time(end, Direction::Down) - self.to_time(start, Direction::Down)
        }
    }

    /// Position after driving `time` seconds in `direction` from `start`.
    pub fn seek(&self, start: f64, direction: Direction, time: f64) -> f64 {
        let from = self.to_time(start, direction);
        match direction {
            Direction::Up => self.to_position(from - time, direction),
            Direction::Down => self.to_position(from + time, direction),
        }
    }
}

/// Estimated state, persisted across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PositionState {
    /// `None` until calibrated.
    pub position: Option<f64>,
    /// Incremental seeks since the last end stop.
    pub jumps: u32,
    /// Signed drive time accumulated while uncalibrated (down positive).
    pub calibration_time: f64,
}

/// Tracks the shutter position from OPENED/CLOSED drive times.
#[derive(Debug, Clone)]
pub struct ShutterPosition {
    timings: ShutterTimings,
    state: PositionState,
}

impl ShutterPosition {
    pub fn new(timings: ShutterTimings) -> Self {
        Self {
            timings,
            state: PositionState::default(),
        }
    }

    pub fn timings(&self) -> &ShutterTimings {
        &self.timings
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    /// Restore a persisted state. Out-of-range positions are dropped.
    pub fn restore(&mut self, state: PositionState) {
        self.state = state;
        if let Some(position) = state.position
            && !(0.0..=100.0).contains(&position)
        {
            self.state.position = None;
        }
    }

    pub fn position(&self) -> Option<f64> {
        self.state.position
    }

    pub fn jumps(&self) -> u32 {
        self.state.jumps
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.position.is_some()
    }

    /// The next positioning command must pass an end stop first.
    pub fn needs_calibration(&self) -> bool {
        !self.is_calibrated() || self.state.jumps >= CALIBRATION_AFTER_JUMPS
    }

    /// Forget the position; the next command recalibrates.
    pub fn invalidate(&mut self) {
        self.state = PositionState::default();
    }

    /// Overwrite the position from an absolute report.
    pub fn set_position(&mut self, position: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&position) {
            return Err(BridgeError::Position(format!(
                "position {position} outside 0..=100"
            )));
        }
        self.state = PositionState {
            position: Some(position),
            jumps: 0,
            calibration_time: 0.0,
        };
        Ok(())
    }

    /// The shutter reached the end stop in `direction`.
    pub fn end_stop(&mut self, direction: Direction) {
        let position = match direction {
            Direction::Up => 0.0,
            Direction::Down => 100.0,
        };
        self.state = PositionState {
            position: Some(position),
            jumps: 0,
            calibration_time: 0.0,
        };
    }

    /// The motor stopped after driving `time` seconds in `direction`.
    pub fn drive(&mut self, direction: Direction, time: f64) {
        if time <= 0.0 {
            return;
        }

        let Some(position) = self.state.position else {
            self.accumulate(direction, time);
            return;
        };

        let new_position = self.timings.seek(position, direction, time);
        if new_position <= 0.0 || new_position >= 100.0 {
            self.end_stop(direction);
        } else {
            self.state.position = Some(new_position);
            self.state.jumps += 1;
        }
    }

    fn accumulate(&mut self, direction: Direction, time: f64) {
        let signed = match direction {
            Direction::Up => -time,
            Direction::Down => time,
        };
        self.state.calibration_time += signed;

        if self.state.calibration_time <= -self.timings.full(Direction::Up) {
            self.end_stop(Direction::Up);
        } else if self.state.calibration_time >= self.timings.full(Direction::Down) {
            self.end_stop(Direction::Down);
        }
    }

    /// Expected drive time between two positions.
    pub fn calc_seek_time(&self, start: f64, end: f64) -> f64 {
        self.timings.calc_seek_time(start, end)
    }

    /// Drive time for a run to the end stop in `direction`, including the
    /// reserve. Fails if it would not fit the command encoding.
    pub fn end_stop_time(&self, direction: Direction) -> Result<f64> {
        check_drive_time(self.timings.full(direction) + TIME_RESERVE)
    }
}

/// Round to the 100 ms resolution of the wire format and check the limit.
pub fn check_drive_time(time: f64) -> Result<f64> {
    let time = (time * 10.0).round() / 10.0;
    if time > MAX_DRIVE_TIME {
        return Err(BridgeError::Position(format!(
            "drive time {time}s exceeds {MAX_DRIVE_TIME}s"
        )));
    }
    Ok(time)
}
