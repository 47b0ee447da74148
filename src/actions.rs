//! Power-key pulse: the sink that touches hardware and the trigger that
//! serializes pulses on a dedicated worker.

use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use std::{
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
    },
    thread,
    time::{Duration, Instant},
};

use crate::mode::ModeGate;

/// Where a pulse lands. Fire-and-forget: implementations log their own failures.
pub trait ActionSink: Send {
    fn press_power(&mut self);
    fn release_power(&mut self);
    fn pulse_haptic(&mut self, duration: Duration);
}

// --------- uinput power key ----------

pub struct UinputSink {
    #[allow(dead_code)]
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create()?;
            return Ok(Self {
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            warn!("uinput not available; running in NO-OP mode");
            Ok(Self::noop())
        }
    }

    pub fn noop() -> Self {
        Self { linux: None }
    }

    pub fn power_key(&mut self, down: bool) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.power(down)?;
        }
        #[cfg(not(target_os = "linux"))]
        let _ = down;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(not(target_os = "linux"))]
struct LinuxUinput;

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create() -> Result<Self> {
        use uinput::event::keyboard;

        let dev = uinput::default()?
            .name("Touchwake Power Key")?
            .event(keyboard::Misc::Power)?
            .create()?;

        info!("uinput: created virtual power key");
        Ok(Self { dev })
    }

    fn power(&mut self, down: bool) -> Result<()> {
        use uinput::event::keyboard;
        self.dev.send(keyboard::Misc::Power, i32::from(down))?;
        self.dev.synchronize()?;
        Ok(())
    }
}

// --------- vibrator ----------

/// Timed-output vibrator: writing N to the file buzzes for N ms.
#[derive(Debug, Clone)]
pub struct HapticMotor {
    path: PathBuf,
}

impl HapticMotor {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn pulse(&self, duration: Duration) -> Result<()> {
        fs::write(&self.path, duration.as_millis().to_string())
            .map_err(|e| anyhow!("vibrator {}: {e}", self.path.display()))
    }
}

/// The real sink: uinput key plus the vibrator named by the live settings.
pub struct DeviceActions {
    keys: UinputSink,
    gate: Arc<ModeGate>,
}

impl DeviceActions {
    pub fn new(keys: UinputSink, gate: Arc<ModeGate>) -> Self {
        Self { keys, gate }
    }
}

impl ActionSink for DeviceActions {
    fn press_power(&mut self) {
        if let Err(e) = self.keys.power_key(true) {
            error!("power key down failed: {e}");
        }
    }

    fn release_power(&mut self) {
        if let Err(e) = self.keys.power_key(false) {
            error!("power key up failed: {e}");
        }
    }

    fn pulse_haptic(&mut self, duration: Duration) {
        let motor = HapticMotor::new(self.gate.settings().feedback.vibrator_path.clone());
        if let Err(e) = motor.pulse(duration) {
            warn!("haptic pulse skipped: {e}");
        }
    }
}

// --------- pulse state machine ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulsePlan {
    pub hold: Duration,
    pub haptics: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulsePhase {
    Idle,
    Pressing,
    Held { until: Instant },
    Releasing { until: Instant },
}

/// key down (+ buzz) → hold → key up → hold → idle
#[derive(Debug)]
pub struct PulseMachine {
    phase: PulsePhase,
    plan: PulsePlan,
}

impl Default for PulseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseMachine {
    pub fn new() -> Self {
        Self {
            phase: PulsePhase::Idle,
            plan: PulsePlan {
                hold: Duration::ZERO,
                haptics: false,
            },
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> PulsePhase {
        self.phase
    }

    pub fn start(&mut self, plan: PulsePlan) {
        self.plan = plan;
        self.phase = PulsePhase::Pressing;
    }

    /// Runs every transition that is due at `now`. Returns the next deadline,
    /// or `None` once the machine is back to idle.
    pub fn step(&mut self, now: Instant, sink: &mut dyn ActionSink) -> Option<Instant> {
        loop {
            match self.phase {
                PulsePhase::Idle => return None,
                PulsePhase::Pressing => {
                    sink.press_power();
                    if self.plan.haptics {
                        sink.pulse_haptic(self.plan.hold);
                    }
                    self.phase = PulsePhase::Held {
                        until: now + self.plan.hold,
                    };
                }
                PulsePhase::Held { until } => {
                    if now < until {
                        return Some(until);
                    }
                    sink.release_power();
                    self.phase = PulsePhase::Releasing {
                        until: now + self.plan.hold,
                    };
                }
                PulsePhase::Releasing { until } => {
                    if now < until {
                        return Some(until);
                    }
                    self.phase = PulsePhase::Idle;
                }
            }
        }
    }
}

// --------- trigger ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Fired,
    /// Another pulse is in flight; this one is dropped, not queued.
    Suppressed,
}

pub struct ActionTrigger {
    in_flight: Arc<AtomicBool>,
    tx: SyncSender<PulsePlan>,
    _worker: thread::JoinHandle<()>,
}

impl ActionTrigger {
    pub fn spawn(sink: Box<dyn ActionSink>) -> Result<Self> {
        let in_flight = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::sync_channel::<PulsePlan>(1);
        let flag = in_flight.clone();
        let handle = thread::Builder::new()
            .name("touchwake-action".into())
            .spawn(move || run_worker(rx, flag, sink))?;
        Ok(Self {
            in_flight,
            tx,
            _worker: handle,
        })
    }

    /// Never blocks.
    pub fn try_fire(&self, plan: PulsePlan) -> TriggerOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("pulse already in flight; trigger suppressed");
            return TriggerOutcome::Suppressed;
        }
        match self.tx.try_send(plan) {
            Ok(()) => TriggerOutcome::Fired,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                error!("action worker unavailable; trigger dropped");
                self.in_flight.store(false, Ordering::Release);
                TriggerOutcome::Suppressed
            }
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Polls until the current pulse finishes. For the CLI and tests.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_in_flight() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

fn run_worker(rx: Receiver<PulsePlan>, in_flight: Arc<AtomicBool>, mut sink: Box<dyn ActionSink>) {
    let mut machine = PulseMachine::new();
    while let Ok(plan) = rx.recv() {
        machine.start(plan);
        while let Some(deadline) = machine.step(Instant::now(), sink.as_mut()) {
            let wait = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok(_) => debug!("pulse request during pulse; dropped"),
                Err(RecvTimeoutError::Timeout) => {}
                // trigger gone: still finish the key release
                Err(RecvTimeoutError::Disconnected) => thread::sleep(wait),
            }
        }
        in_flight.store(false, Ordering::Release);
        debug!("pulse done");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Act, RecordingSink};
    use super::*;
    use std::sync::Barrier;

    const HOLD: Duration = Duration::from_millis(60);

    #[test]
    fn machine_walks_press_hold_release_hold() {
        let mut sink = RecordingSink::default();
        let mut m = PulseMachine::new();
        let t0 = Instant::now();
        m.start(PulsePlan { hold: HOLD, haptics: true });

        assert_eq!(m.step(t0, &mut sink), Some(t0 + HOLD));
        assert_eq!(sink.acts(), vec![Act::Press, Act::Haptic(HOLD)]);
        assert_eq!(m.phase(), PulsePhase::Held { until: t0 + HOLD });

        // early wake-up changes nothing
        assert_eq!(m.step(t0 + HOLD / 2, &mut sink), Some(t0 + HOLD));
        assert_eq!(sink.acts().len(), 2);

        let t1 = t0 + HOLD;
        assert_eq!(m.step(t1, &mut sink), Some(t1 + HOLD));
        assert_eq!(sink.acts().last(), Some(&Act::Release));

        assert_eq!(m.step(t1 + HOLD, &mut sink), None);
        assert_eq!(m.phase(), PulsePhase::Idle);
        assert_eq!(sink.acts(), vec![Act::Press, Act::Haptic(HOLD), Act::Release]);
    }

    #[test]
    fn machine_without_haptics_never_buzzes() {
        let mut sink = RecordingSink::default();
        let mut m = PulseMachine::new();
        let t0 = Instant::now();
        m.start(PulsePlan { hold: HOLD, haptics: false });
        m.step(t0, &mut sink);
        m.step(t0 + HOLD, &mut sink);
        assert_eq!(m.step(t0 + HOLD * 2, &mut sink), None);
        assert_eq!(sink.acts(), vec![Act::Press, Act::Release]);
    }

    #[test]
    fn second_trigger_during_pulse_is_suppressed() {
        let sink = RecordingSink::default();
        let trigger = ActionTrigger::spawn(Box::new(sink.clone())).unwrap();
        let plan = PulsePlan { hold: Duration::from_millis(150), haptics: true };

        assert_eq!(trigger.try_fire(plan), TriggerOutcome::Fired);
        assert_eq!(trigger.try_fire(plan), TriggerOutcome::Suppressed);
        assert!(trigger.wait_idle(Duration::from_secs(3)));
        assert_eq!(
            sink.acts(),
            vec![Act::Press, Act::Haptic(Duration::from_millis(150)), Act::Release]
        );

        // no permanent latch: the next gesture fires again
        assert_eq!(trigger.try_fire(plan), TriggerOutcome::Fired);
        assert!(trigger.wait_idle(Duration::from_secs(3)));
        assert_eq!(sink.acts().iter().filter(|a| **a == Act::Press).count(), 2);
    }

    #[test]
    fn racing_triggers_fire_once() {
        let sink = RecordingSink::default();
        let trigger = Arc::new(ActionTrigger::spawn(Box::new(sink.clone())).unwrap());
        let plan = PulsePlan { hold: Duration::from_millis(200), haptics: false };
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = trigger.clone();
                let b = barrier.clone();
                thread::spawn(move || {
                    b.wait();
                    t.try_fire(plan)
                })
            })
            .collect();
        let fired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == TriggerOutcome::Fired)
            .count();
        assert_eq!(fired, 1);

        assert!(trigger.wait_idle(Duration::from_secs(3)));
        assert_eq!(sink.acts(), vec![Act::Press, Act::Release]);
    }

    #[test]
    fn haptic_motor_writes_duration_in_ms() {
        let path = std::env::temp_dir().join(format!("touchwake-vib-{}", std::process::id()));
        HapticMotor::new(path.clone()).pulse(Duration::from_millis(60)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "60");
        let _ = fs::remove_file(&path);
    }
}
