use log::{debug, info};
use std::{
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::actions::{ActionTrigger, PulsePlan, TriggerOutcome};
use crate::gestures::{GestureCompleted, GestureKind};
use crate::mode::ModeGate;

#[derive(Debug, Default)]
pub struct Stats {
    pub events: AtomicU64,
    pub double_taps: AtomicU64,
    pub sweeps: AtomicU64,
    pub fired: AtomicU64,
    pub suppressed: AtomicU64,
    pub pocketed: AtomicU64,
}

impl Stats {
    pub fn to_json(&self) -> serde_json::Value {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "events": get(&self.events),
            "double_taps": get(&self.double_taps),
            "sweeps": get(&self.sweeps),
            "fired": get(&self.fired),
            "suppressed": get(&self.suppressed),
            "pocketed": get(&self.pocketed),
        })
    }
}

fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

/// A proximity file reading a non-zero integer means the panel is covered.
/// Unreadable or non-numeric content counts as uncovered.
pub fn pocket_covered(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(s) => s.trim().parse::<i64>().map(|v| v != 0).unwrap_or(false),
        Err(e) => {
            debug!("pocket sensor {}: {e}", path.display());
            false
        }
    }
}

/// Hands completed gestures to the trigger.
#[derive(Clone)]
pub struct Dispatcher {
    gate: Arc<ModeGate>,
    trigger: Arc<ActionTrigger>,
    stats: Arc<Stats>,
}

impl Dispatcher {
    pub fn new(gate: Arc<ModeGate>, trigger: Arc<ActionTrigger>, stats: Arc<Stats>) -> Self {
        Self {
            gate,
            trigger,
            stats,
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// `None` when the pocket guard dropped the gesture.
    pub fn dispatch(&self, done: GestureCompleted) -> Option<TriggerOutcome> {
        match done.kind {
            GestureKind::DoubleTap => bump(&self.stats.double_taps),
            GestureKind::Sweep => bump(&self.stats.sweeps),
        }

        let settings = self.gate.settings();
        if let Some(sensor) = settings.pocket_sensor.as_deref() {
            if pocket_covered(sensor) {
                info!("{:?} at {} ms ignored: panel covered", done.kind, done.at_ms);
                bump(&self.stats.pocketed);
                return None;
            }
        }

        let plan = PulsePlan {
            hold: settings.feedback.pulse,
            haptics: settings.feedback.haptics,
        };
        let outcome = self.trigger.try_fire(plan);
        match outcome {
            TriggerOutcome::Fired => {
                info!("{:?} in {:?} mode: power key pulse", done.kind, done.mode);
                bump(&self.stats.fired);
            }
            TriggerOutcome::Suppressed => {
                debug!("{:?} suppressed; pulse in flight", done.kind);
                bump(&self.stats.suppressed);
            }
        }
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::{Act, RecordingSink};
    use crate::config::Settings;
    use crate::gestures::Mode;
    use std::time::Duration;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("touchwake-{name}-{}", std::process::id()))
    }

    fn dispatcher(settings: Settings) -> (Dispatcher, RecordingSink) {
        let sink = RecordingSink::default();
        let trigger = Arc::new(ActionTrigger::spawn(Box::new(sink.clone())).unwrap());
        let gate = Arc::new(ModeGate::new(settings, true));
        (Dispatcher::new(gate, trigger, Arc::new(Stats::default())), sink)
    }

    fn tap(at_ms: u64) -> GestureCompleted {
        GestureCompleted {
            kind: GestureKind::DoubleTap,
            mode: Mode::Unlocking,
            at_ms,
        }
    }

    #[test]
    fn completion_pulses_with_configured_hold() {
        let mut s = Settings::default();
        s.feedback.pulse = Duration::from_millis(30);
        s.feedback.haptics = false;
        let (d, sink) = dispatcher(s);

        assert_eq!(d.dispatch(tap(10)), Some(TriggerOutcome::Fired));
        assert_eq!(d.dispatch(tap(20)), Some(TriggerOutcome::Suppressed));
        assert!(d.trigger.wait_idle(Duration::from_secs(3)));

        assert_eq!(sink.acts(), vec![Act::Press, Act::Release]);
        assert_eq!(d.stats().double_taps.load(Ordering::Relaxed), 2);
        assert_eq!(d.stats().fired.load(Ordering::Relaxed), 1);
        assert_eq!(d.stats().suppressed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn covered_sensor_drops_gesture() {
        let sensor = scratch("prox");
        fs::write(&sensor, "1\n").unwrap();
        let mut s = Settings::default();
        s.pocket_sensor = Some(sensor.clone());
        let (d, sink) = dispatcher(s);

        assert_eq!(d.dispatch(tap(5)), None);
        assert!(!d.trigger.is_in_flight());
        assert!(sink.acts().is_empty());
        assert_eq!(d.stats().pocketed.load(Ordering::Relaxed), 1);

        fs::write(&sensor, "0").unwrap();
        assert_eq!(d.dispatch(tap(50)), Some(TriggerOutcome::Fired));
        assert!(d.trigger.wait_idle(Duration::from_secs(3)));
        let _ = fs::remove_file(&sensor);
    }

    #[test]
    fn unreadable_sensor_is_uncovered() {
        assert!(!pocket_covered(&scratch("missing-sensor")));
        let junk = scratch("junk");
        fs::write(&junk, "near").unwrap();
        assert!(!pocket_covered(&junk));
        let _ = fs::remove_file(&junk);
    }
}
