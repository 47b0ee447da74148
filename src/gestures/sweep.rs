//! Directional sweep detection through two latched gates.

use serde::{Deserialize, Serialize};

use super::{Region, Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    Horizontal,
    Vertical,
}

/// Gates along `axis`. Sweep direction follows the gate order: ascending when
/// `gate2_far > gate1_far`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepThresholds {
    pub axis: Axis,
    pub region: Region,
    pub gate1_near: i32,
    pub gate1_far: i32,
    pub gate2_far: i32,
}

impl SweepThresholds {
    fn ascending(&self) -> bool {
        self.gate2_far > self.gate1_far
    }

    /// Splits a sample into (along-axis, across-axis) and reports whether the
    /// across coordinate stays inside the corridor.
    fn project(&self, s: Sample) -> (i32, bool) {
        let r = &self.region;
        match self.axis {
            Axis::Horizontal => (s.x, s.y > r.up && s.y < r.down),
            Axis::Vertical => (s.y, s.x > r.left && s.x < r.right),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepState {
    pub gate1_passed: bool,
    pub gate2_passed: bool,
    pub armed: bool,
}

impl Default for SweepState {
    fn default() -> Self {
        Self {
            gate1_passed: false,
            gate2_passed: false,
            armed: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepDetector {
    state: SweepState,
}

fn strictly_between(v: i32, a: i32, b: i32) -> bool {
    v > a.min(b) && v < a.max(b)
}

impl SweepDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SweepState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = SweepState::default();
    }

    /// Returns true exactly once per swipe: on the first sample past
    /// `gate2_far` after both gates latched.
    pub fn on_sample(&mut self, s: Sample, th: &SweepThresholds) -> bool {
        if !self.state.armed {
            return false;
        }
        let (along, in_corridor) = th.project(s);
        if !in_corridor {
            return false;
        }

        if !self.state.gate1_passed {
            if !strictly_between(along, th.gate1_near, th.gate1_far) {
                return false;
            }
            self.state.gate1_passed = true;
        }

        if !self.state.gate2_passed {
            if !strictly_between(along, th.gate1_far, th.gate2_far) {
                return false;
            }
            self.state.gate2_passed = true;
        }

        let past = if th.ascending() {
            along > th.gate2_far
        } else {
            along < th.gate2_far
        };
        if !past {
            return false;
        }

        self.state = SweepState {
            armed: false,
            ..SweepState::default()
        };
        true
    }
}
