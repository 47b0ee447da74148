//! Repeated-tap detection.
//!
//! Each contact contributes at most one tap: the first in-region sample after
//! a lift. The run of taps survives lifts and is only dropped by a slot
//! change, a continuity failure, completion or a mode change.

use serde::Serialize;

use super::{Region, Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TapThresholds {
    /// Per-axis distance a follow-up tap must stay under.
    pub max_deviation: u32,
    pub max_interval_ms: u64,
    /// Always >= 2; the config layer clamps smaller values.
    pub required_taps: u32,
    pub region: Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapState {
    pub tap_count: u32,
    pub last_position: (i32, i32),
    pub last_timestamp: u64,
    /// Open until the current contact has given its tap; a lift reopens it.
    pub armed: bool,
}

impl Default for TapState {
    fn default() -> Self {
        Self {
            tap_count: 0,
            last_position: (0, 0),
            last_timestamp: 0,
            armed: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct DoubleTapDetector {
    state: TapState,
}

impl DoubleTapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TapState {
        &self.state
    }

    /// Drops the tap run. The contact gate is left as it is: a finger that
    /// is still down does not get a second tap out of a reset.
    pub fn reset(&mut self) {
        self.state = TapState {
            armed: self.state.armed,
            ..TapState::default()
        };
    }

    /// Finger lift: the next contact may tap.
    pub fn lift(&mut self) {
        self.state.armed = true;
    }

    /// Returns true exactly when this sample completes the tap run.
    pub fn on_sample(&mut self, s: Sample, th: &TapThresholds) -> bool {
        if !self.state.armed || !th.region.contains(s.x, s.y) {
            return false;
        }
        self.state.armed = false;

        if self.state.tap_count == 0 {
            self.seed(s);
        } else if self.continues_run(s, th) {
            self.state.tap_count += 1;
        } else {
            // abandon the old attempt, this contact starts a new one
            self.seed(s);
        }

        if self.state.tap_count == th.required_taps {
            self.reset();
            return true;
        }
        false
    }

    fn seed(&mut self, s: Sample) {
        self.state.tap_count = 1;
        self.state.last_position = (s.x, s.y);
        self.state.last_timestamp = s.timestamp_ms;
    }

    // Deviation and interval are measured against the first tap of the run.
    fn continues_run(&self, s: Sample, th: &TapThresholds) -> bool {
        let (lx, ly) = self.state.last_position;
        let dx = s.x.abs_diff(lx);
        let dy = s.y.abs_diff(ly);
        let elapsed = s.timestamp_ms.saturating_sub(self.state.last_timestamp);
        dx < th.max_deviation && dy < th.max_deviation && elapsed < th.max_interval_ms
    }
}
