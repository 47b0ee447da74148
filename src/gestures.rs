//! Gesture recognition: double-tap and sweep detectors behind one recognizer.

pub mod doubletap;
pub mod sweep;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::coalescer::{DeliveryPolicy, Feed, SampleCoalescer};
use crate::input::TimedEvent;
use crate::mode::{GateSnapshot, ModeGate};
use doubletap::DoubleTapDetector;
use sweep::SweepDetector;

/// One resolved touch observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub x: i32,
    pub y: i32,
    pub timestamp_ms: u64,
}

/// Pixel rectangle; bounds are exclusive on every side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub up: i32,
    pub down: i32,
    pub left: i32,
    pub right: i32,
}

impl Region {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x > self.left && x < self.right && y > self.up && y < self.down
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Display blanked; gestures wake it.
    Unlocking,
    /// Display active; gestures put it to sleep.
    Locking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureKind {
    DoubleTap,
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureCompleted {
    pub kind: GestureKind,
    pub mode: Mode,
    pub at_ms: u64,
}

/// Owns both detectors and their coalescing lanes. Fed one raw event at a
/// time from a single worker; reads a fresh settings snapshot per sample.
#[derive(Debug)]
pub struct Recognizer {
    tap_feed: SampleCoalescer,
    sweep_feed: SampleCoalescer,
    double_tap: DoubleTapDetector,
    sweep: SweepDetector,
    epoch: Option<u64>,
}

impl Default for Recognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Recognizer {
    pub fn new() -> Self {
        Self {
            tap_feed: SampleCoalescer::new(DeliveryPolicy::EitherAxis),
            sweep_feed: SampleCoalescer::new(DeliveryPolicy::BothAxes),
            double_tap: DoubleTapDetector::new(),
            sweep: SweepDetector::new(),
            epoch: None,
        }
    }

    /// Feed one raw event. Returns a completion when either detector finishes
    /// a gesture on this event; if both finish at once the double-tap wins and
    /// the sweep completion is dropped.
    pub fn handle(&mut self, ev: TimedEvent, gate: &ModeGate) -> Option<GestureCompleted> {
        let tap = match self.tap_feed.push(ev.event, ev.at_ms) {
            Feed::Sample(s) => {
                let snap = gate.snapshot();
                self.sync_epoch(&snap);
                self.tap_sample(s, &snap)
            }
            Feed::TrackLost => {
                self.double_tap.lift();
                None
            }
            Feed::SlotChanged => {
                self.double_tap.reset();
                None
            }
            Feed::Pending => None,
        };

        let sweep = match self.sweep_feed.push(ev.event, ev.at_ms) {
            Feed::Sample(s) => {
                let snap = gate.snapshot();
                self.sync_epoch(&snap);
                self.sweep_sample(s, &snap)
            }
            Feed::TrackLost | Feed::SlotChanged => {
                self.sweep.reset();
                None
            }
            Feed::Pending => None,
        };

        tap.or(sweep)
    }

    /// Drop all partial progress on both detectors. The tap lane's contact
    /// gate is kept.
    pub fn reset(&mut self) {
        self.double_tap.reset();
        self.sweep.reset();
    }

    #[cfg(test)]
    pub fn double_tap(&self) -> &DoubleTapDetector {
        &self.double_tap
    }

    #[cfg(test)]
    pub fn sweep(&self) -> &SweepDetector {
        &self.sweep
    }

    // A gesture begun in one mode is void after any mode transition.
    fn sync_epoch(&mut self, snap: &GateSnapshot) {
        if let Some(seen) = self.epoch {
            if seen != snap.epoch {
                debug!("mode changed to {:?}; dropping partial gestures", snap.mode);
                self.reset();
            }
        }
        self.epoch = Some(snap.epoch);
    }

    fn tap_sample(&mut self, s: Sample, snap: &GateSnapshot) -> Option<GestureCompleted> {
        let cfg = snap.settings.for_mode(snap.mode);
        if !cfg.double_tap_enabled {
            return None;
        }
        self.double_tap
            .on_sample(s, &cfg.double_tap)
            .then_some(GestureCompleted {
                kind: GestureKind::DoubleTap,
                mode: snap.mode,
                at_ms: s.timestamp_ms,
            })
    }

    fn sweep_sample(&mut self, s: Sample, snap: &GateSnapshot) -> Option<GestureCompleted> {
        let cfg = snap.settings.for_mode(snap.mode);
        if !cfg.sweep_enabled {
            return None;
        }
        self.sweep
            .on_sample(s, &cfg.sweep)
            .then_some(GestureCompleted {
                kind: GestureKind::Sweep,
                mode: snap.mode,
                at_ms: s.timestamp_ms,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::input::RawEvent;

    fn ev(event: RawEvent, at_ms: u64) -> TimedEvent {
        TimedEvent { event, at_ms }
    }

    fn settings(tap: bool, sweep: bool) -> Settings {
        let mut s = Settings::default();
        for m in [&mut s.gestures.unlocking, &mut s.gestures.locking] {
            m.double_tap_enabled = tap;
            m.sweep_enabled = sweep;
        }
        s
    }

    fn touch(r: &mut Recognizer, gate: &ModeGate, x: i32, y: i32, t: u64) -> Vec<GestureCompleted> {
        let mut out = vec![];
        out.extend(r.handle(ev(RawEvent::PositionX(x), t), gate));
        out.extend(r.handle(ev(RawEvent::PositionY(y), t), gate));
        out
    }

    #[test]
    fn region_bounds_are_exclusive() {
        let r = Region { up: 0, down: 960, left: 0, right: 540 };
        assert!(r.contains(1, 1));
        assert!(!r.contains(0, 100));
        assert!(!r.contains(100, 960));
        let degenerate = Region { up: 10, down: 10, left: 0, right: 540 };
        assert!(!degenerate.contains(100, 10));
    }

    #[test]
    fn tap_lift_tap_fires() {
        let gate = ModeGate::new(settings(true, false), true);
        let mut r = Recognizer::new();

        // either-axis lane: the first update lands on y=0 and the region
        // rejects it without using up the contact
        assert!(r.handle(ev(RawEvent::PositionX(200), 0), &gate).is_none());
        assert!(r.handle(ev(RawEvent::PositionY(300), 0), &gate).is_none());
        assert_eq!(r.double_tap().state().tap_count, 1);
        assert!(r.handle(ev(RawEvent::TrackLost, 80), &gate).is_none());
        assert_eq!(r.double_tap().state().tap_count, 1);

        let done = r.handle(ev(RawEvent::PositionX(210), 200), &gate);
        assert_eq!(
            done,
            Some(GestureCompleted { kind: GestureKind::DoubleTap, mode: Mode::Unlocking, at_ms: 200 })
        );
    }

    #[test]
    fn one_contact_with_jitter_does_not_fire() {
        let gate = ModeGate::new(settings(true, false), true);
        let mut r = Recognizer::new();

        let mut fired = vec![];
        for (i, (x, y)) in [(200, 300), (203, 298), (199, 301), (201, 300)].into_iter().enumerate() {
            fired.extend(touch(&mut r, &gate, x, y, i as u64 * 10));
        }
        assert!(fired.is_empty());
        assert_eq!(r.double_tap().state().tap_count, 1);
    }

    #[test]
    fn lone_tap_long_after_a_lift_does_not_fire() {
        let gate = ModeGate::new(settings(true, false), true);
        let mut r = Recognizer::new();

        touch(&mut r, &gate, 200, 300, 0);
        r.handle(ev(RawEvent::TrackLost, 80), &gate);
        let fired = touch(&mut r, &gate, 210, 305, 5_000);
        assert!(fired.is_empty());
        assert_eq!(r.double_tap().state().tap_count, 1);
        assert_eq!(r.double_tap().state().last_timestamp, 5_000);
    }

    #[test]
    fn sweep_through_raw_events_fires_once() {
        let gate = ModeGate::new(settings(false, true), true);
        let mut r = Recognizer::new();

        let mut fired = vec![];
        for (i, x) in [10, 130, 430, 500].into_iter().enumerate() {
            fired.extend(touch(&mut r, &gate, x, 700, i as u64 * 20));
        }
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, GestureKind::Sweep);
        assert_eq!(fired[0].at_ms, 40);
    }

    #[test]
    fn mode_transition_voids_partial_sweep() {
        let gate = ModeGate::new(settings(false, true), true);
        let mut r = Recognizer::new();

        touch(&mut r, &gate, 10, 700, 0);
        touch(&mut r, &gate, 130, 700, 20);
        assert!(r.sweep().state().gate2_passed);

        gate.set_blanked(false);
        gate.set_blanked(true);
        let fired = touch(&mut r, &gate, 430, 700, 40);
        assert!(fired.is_empty());
        assert!(!r.sweep().state().gate1_passed);
    }

    #[test]
    fn lift_clears_sweep_but_keeps_tap_run() {
        let gate = ModeGate::new(settings(true, true), true);
        let mut r = Recognizer::new();

        touch(&mut r, &gate, 10, 700, 0);
        assert_eq!(r.double_tap().state().tap_count, 1);
        assert!(r.sweep().state().gate1_passed);

        r.handle(ev(RawEvent::TrackLost, 10), &gate);
        assert_eq!(r.double_tap().state().tap_count, 1);
        assert!(r.double_tap().state().armed);
        assert!(!r.sweep().state().gate1_passed);
    }

    #[test]
    fn second_contact_clears_both_lanes() {
        let gate = ModeGate::new(settings(true, true), true);
        let mut r = Recognizer::new();

        touch(&mut r, &gate, 10, 700, 0);
        r.handle(ev(RawEvent::SlotChanged, 10), &gate);
        assert_eq!(r.double_tap().state().tap_count, 0);
        assert!(!r.sweep().state().gate1_passed);
    }

    #[test]
    fn swipe_is_not_a_double_tap() {
        let gate = ModeGate::new(settings(true, true), true);
        let mut r = Recognizer::new();

        let mut fired = vec![];
        for (i, x) in [10, 60, 130, 250, 430, 500].into_iter().enumerate() {
            fired.extend(touch(&mut r, &gate, x, 700, i as u64 * 40));
        }
        let kinds: Vec<_> = fired.iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![GestureKind::Sweep]);
    }

    #[test]
    fn disabled_gesture_is_never_reported() {
        let gate = ModeGate::new(settings(false, false), true);
        let mut r = Recognizer::new();
        let mut fired = vec![];
        for t in 0..4 {
            fired.extend(touch(&mut r, &gate, 100, 100, t * 10));
        }
        assert!(fired.is_empty());
    }

    #[test]
    fn config_change_applies_to_next_sample() {
        let gate = ModeGate::new(settings(true, false), true);
        let mut r = Recognizer::new();

        r.handle(ev(RawEvent::PositionY(100), 0), &gate);
        r.handle(ev(RawEvent::PositionX(100), 0), &gate);
        r.handle(ev(RawEvent::TrackLost, 20), &gate);
        let mut tighter = settings(true, false);
        tighter.gestures.unlocking.double_tap.max_deviation = 1;
        gate.replace_settings(tighter);

        let done = r.handle(ev(RawEvent::PositionX(110), 50), &gate);
        assert!(done.is_none());
        assert_eq!(r.double_tap().state().tap_count, 1);
        assert_eq!(r.double_tap().state().last_position, (110, 100));
    }
}
