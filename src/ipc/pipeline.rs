use anyhow::Result;
use log::{debug, error, info, warn};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use evdev::Device;

use super::dispatch::Dispatcher;
use crate::gestures::Recognizer;
use crate::input::{self, LiftPredicate, RawEvent, TimedEvent};
use crate::mode::ModeGate;

/// Device selection and lift predicate, fixed for the daemon's lifetime.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub device_names: Vec<String>,
    pub lift: LiftPredicate,
}

pub fn spawn_reader(
    cfg: ReaderConfig,
    tx: Sender<TimedEvent>,
    running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let h = thread::Builder::new()
        .name("touchwake-input".into())
        .spawn(move || read_loop(cfg, tx, running))?;
    Ok(h)
}

/// Converts and enqueues only; never waits on recognition.
fn read_loop(cfg: ReaderConfig, tx: Sender<TimedEvent>, running: Arc<AtomicBool>) {
    let mut devs: Vec<Device> = vec![];
    for d in input::discover_touchscreens(&cfg.device_names) {
        match Device::open(&d.path) {
            Ok(dev) => {
                if let Err(e) = dev.set_nonblocking(true) {
                    warn!("{}: cannot set non-blocking: {e}", d.path);
                    continue;
                }
                info!("input: reading {} ({})", d.name, d.path);
                devs.push(dev);
            }
            Err(e) => warn!("failed to open {}: {e}", d.path),
        }
    }
    if devs.is_empty() {
        warn!("no matching touch devices; input reader idle");
        while running.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_secs(1));
        }
        return;
    }

    let start = Instant::now();
    while running.load(Ordering::Relaxed) {
        let mut any_event = false;
        for dev in devs.iter_mut() {
            // WouldBlock when drained
            let Ok(events) = dev.fetch_events() else {
                continue;
            };
            for ev in events {
                any_event = true;
                let event = input::classify(&ev, &cfg.lift);
                if event == RawEvent::Ignored {
                    continue;
                }
                let at_ms = start.elapsed().as_millis() as u64;
                if tx.send(TimedEvent { event, at_ms }).is_err() {
                    debug!("recognizer gone; input reader exiting");
                    return;
                }
            }
        }
        if !any_event {
            thread::sleep(Duration::from_millis(4));
        }
    }
}

pub fn spawn_recognizer(
    rx: Receiver<TimedEvent>,
    gate: Arc<ModeGate>,
    dispatcher: Dispatcher,
) -> Result<thread::JoinHandle<()>> {
    let h = thread::Builder::new()
        .name("touchwake-recognizer".into())
        .spawn(move || run_recognition(rx, &gate, &dispatcher))?;
    Ok(h)
}

/// Drains events in arrival order until every sender is gone.
pub fn run_recognition(rx: Receiver<TimedEvent>, gate: &ModeGate, dispatcher: &Dispatcher) {
    let mut recognizer = Recognizer::new();
    for ev in rx {
        dispatcher.stats().events.fetch_add(1, Ordering::Relaxed);
        if let Some(done) = recognizer.handle(ev, gate) {
            debug!("{:?} completed at {} ms", done.kind, done.at_ms);
            dispatcher.dispatch(done);
        }
    }
    error!("input channel closed; recognition stopped");
}
