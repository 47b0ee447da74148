use anyhow::{Result, anyhow};
use log::{error, info, warn};
use notify::{RecursiveMode, Watcher};
use serde_json::{Value, json};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
};

use super::dispatch::{Dispatcher, Stats};
use super::pipeline::{self, ReaderConfig};
use super::runtime::socket_path;
use crate::actions::{ActionTrigger, DeviceActions, UinputSink};
use crate::config::{self, DaemonConfigState};
use crate::gestures::{GestureKind, Mode};
use crate::mode::ModeGate;

type Reply = Sender<std::result::Result<Value, String>>;

enum IpcMsg {
    /// From the profile watcher.
    FileChanged(Vec<PathBuf>),
    Reload(Reply),
    UseProfile(String, Reply),
    Set { key: String, value: String, reply: Reply },
    Shutdown,
}

/// Read side shared with client threads; mutations go through the main loop.
struct Shared {
    cfg: Mutex<DaemonConfigState>,
    gate: Arc<ModeGate>,
    stats: Arc<Stats>,
    trigger: Arc<ActionTrigger>,
}

impl Shared {
    fn cfg(&self) -> std::sync::MutexGuard<'_, DaemonConfigState> {
        self.cfg.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, cfg: &DaemonConfigState) {
        self.gate.replace_settings(cfg.settings());
    }
}

pub fn run_daemon() -> Result<()> {
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    let cfg = DaemonConfigState::load_or_install_default()?;
    info!("daemon: active profile '{}'", cfg.active_name);

    // assume the display is on when the daemon comes up
    let gate = Arc::new(ModeGate::new(cfg.settings(), false));
    let keys = UinputSink::new().unwrap_or_else(|e| {
        warn!("uinput unavailable ({e}); power key disabled");
        UinputSink::noop()
    });
    let trigger = Arc::new(ActionTrigger::spawn(Box::new(DeviceActions::new(
        keys,
        gate.clone(),
    )))?);
    let stats = Arc::new(Stats::default());

    let running = Arc::new(AtomicBool::new(true));
    let (tx_evt, rx_evt) = mpsc::channel();
    let reader_cfg = ReaderConfig {
        device_names: cfg.profile.input.device_names.clone(),
        lift: cfg.profile.lift_predicate(),
    };
    pipeline::spawn_reader(reader_cfg, tx_evt, running.clone())?;
    let dispatcher = Dispatcher::new(gate.clone(), trigger.clone(), stats.clone());
    pipeline::spawn_recognizer(rx_evt, gate.clone(), dispatcher)?;

    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();

    // live reload
    let tx_watch = tx_req.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(ev) if ev.kind.is_modify() || ev.kind.is_create() => {
                let _ = tx_watch.send(IpcMsg::FileChanged(ev.paths));
            }
            Ok(_) => {}
            Err(e) => warn!("profile watcher: {e}"),
        }
    })?;
    watcher.watch(&cfg.profiles_dir, RecursiveMode::NonRecursive)?;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let tx_sig = tx_req.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("daemon: signal {sig}; shutting down");
            let _ = tx_sig.send(IpcMsg::Shutdown);
        }
    });

    let shared = Arc::new(Shared {
        cfg: Mutex::new(cfg),
        gate,
        stats,
        trigger,
    });

    let accept_shared = shared.clone();
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let st = accept_shared.clone();
                    let tx = tx_req.clone();
                    thread::spawn(move || {
                        if let Err(e) = handle_client(stream, &st, tx) {
                            error!("ipc client error: {e}");
                        }
                    });
                }
                Err(e) => error!("ipc accept failed: {e}"),
            }
        }
    });

    while let Ok(msg) = rx_req.recv() {
        if !apply(&shared, msg) {
            break;
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = std::fs::remove_file(&sock);
    info!("daemon: stopped");
    Ok(())
}

/// Main-loop side of a request. Returns false on shutdown.
fn apply(shared: &Shared, msg: IpcMsg) -> bool {
    match msg {
        IpcMsg::FileChanged(paths) => {
            let mut cfg = shared.cfg();
            let active = cfg.active_path();
            if !paths.iter().any(|p| p.file_name() == active.file_name()) {
                return true;
            }
            match cfg.reload() {
                Ok(()) => {
                    shared.publish(&cfg);
                    info!("profile '{}' changed on disk; reloaded", cfg.active_name);
                }
                Err(e) => error!("reload failed, keeping last good profile: {e}"),
            }
        }
        IpcMsg::Reload(reply) => {
            let mut cfg = shared.cfg();
            let res = match cfg.reload() {
                Ok(()) => {
                    shared.publish(&cfg);
                    info!("profile reloaded");
                    Ok(json!({"active_profile": cfg.active_name}))
                }
                Err(e) => {
                    error!("reload failed: {e}");
                    Err(e.to_string())
                }
            };
            let _ = reply.send(res);
        }
        IpcMsg::UseProfile(name, reply) => {
            let mut cfg = shared.cfg();
            let res = match cfg.set_active(&name) {
                Ok(()) => {
                    shared.publish(&cfg);
                    info!("switched active profile to {}", cfg.active_name);
                    Ok(json!({"active_profile": cfg.active_name}))
                }
                Err(e) => {
                    error!("use profile failed: {e}");
                    Err(e.to_string())
                }
            };
            let _ = reply.send(res);
        }
        IpcMsg::Set { key, value, reply } => {
            let mut cfg = shared.cfg();
            let res = cfg
                .set_param(&key, &value)
                .and_then(|()| config::get_param(&cfg.profile, &key))
                .map(|v| {
                    shared.publish(&cfg);
                    info!("override {key} = {v}");
                    json!({"key": key, "value": v})
                })
                .map_err(|e| e.to_string());
            let _ = reply.send(res);
        }
        IpcMsg::Shutdown => return false,
    }
    true
}

fn ok(data: Value) -> Value {
    json!({"ok": true, "data": data})
}

fn fail(msg: impl std::fmt::Display) -> Value {
    json!({"ok": false, "error": msg.to_string()})
}

fn roundtrip(tx: &Sender<IpcMsg>, make: impl FnOnce(Reply) -> IpcMsg) -> Value {
    let (reply, rx) = mpsc::channel();
    if tx.send(make(reply)).is_err() {
        return fail("daemon is shutting down");
    }
    match rx.recv() {
        Ok(Ok(v)) => ok(v),
        Ok(Err(e)) => fail(e),
        Err(_) => fail("daemon is shutting down"),
    }
}

fn gestures_enabled(gate: &ModeGate, mode: Mode) -> Value {
    json!({
        "double_tap": gate.is_enabled(mode, GestureKind::DoubleTap),
        "sweep": gate.is_enabled(mode, GestureKind::Sweep),
    })
}

fn handle_client(mut stream: UnixStream, st: &Shared, tx_req: Sender<IpcMsg>) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: Value = serde_json::from_str(&line)?;
    let resp = handle_op(&req, st, &tx_req);
    writeln!(stream, "{resp}")?;
    Ok(())
}

fn handle_op(req: &Value, st: &Shared, tx_req: &Sender<IpcMsg>) -> Value {
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");
    let arg = |k: &str| req.get(k).and_then(|v| v.as_str()).unwrap_or("").to_string();

    match op {
        "status" => {
            let cfg = st.cfg();
            let mode = st.gate.current_mode();
            ok(json!({
                "mode": mode,
                "active_profile": cfg.active_name,
                "enabled": {
                    "unlocking": gestures_enabled(&st.gate, Mode::Unlocking),
                    "locking": gestures_enabled(&st.gate, Mode::Locking),
                },
                "thresholds": {
                    "double_tap": st.gate.thresholds(mode, GestureKind::DoubleTap),
                    "sweep": st.gate.thresholds(mode, GestureKind::Sweep),
                },
                "pulse_in_flight": st.trigger.is_in_flight(),
                "stats": st.stats.to_json(),
                "devices": cfg.detected_devices,
                "socket": socket_path().ok(),
            }))
        }
        "reload" => roundtrip(tx_req, IpcMsg::Reload),
        "use" => {
            let name = arg("profile");
            roundtrip(tx_req, |r| IpcMsg::UseProfile(name, r))
        }
        "list" => {
            let cfg = st.cfg();
            ok(json!({"profiles": cfg.list_profiles(), "active": cfg.active_name}))
        }
        "doctor" => ok(st.cfg().doctor_report()),
        "screen" => match arg("state").as_str() {
            "on" | "off" => {
                let blanked = arg("state") == "off";
                let changed = st.gate.set_blanked(blanked);
                ok(json!({"mode": st.gate.current_mode(), "changed": changed}))
            }
            other => fail(format!("screen state must be on or off, got '{other}'")),
        },
        "get" => match config::get_param(&st.cfg().profile, &arg("key")) {
            Ok(v) => ok(json!({"key": arg("key"), "value": v})),
            Err(e) => fail(e),
        },
        "set" => {
            let (key, value) = (arg("key"), arg("value"));
            roundtrip(tx_req, |reply| IpcMsg::Set { key, value, reply })
        }
        "shutdown" => {
            let _ = tx_req.send(IpcMsg::Shutdown);
            ok(json!("shutting down"))
        }
        _ => fail(format!("unknown op: {op}")),
    }
}

// client helper
pub fn client_request(req: Value) -> Result<Value> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "touchwake daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: Value = serde_json::from_str(&resp)?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::RecordingSink;
    use std::fs;

    fn shared(name: &str) -> (Arc<Shared>, PathBuf) {
        let dir = std::env::temp_dir().join(format!("touchwake-ipc-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let cfg = DaemonConfigState::load_from(dir.clone()).unwrap();
        let gate = Arc::new(ModeGate::new(cfg.settings(), false));
        let trigger = Arc::new(ActionTrigger::spawn(Box::new(RecordingSink::default())).unwrap());
        let st = Shared {
            cfg: Mutex::new(cfg),
            gate,
            stats: Arc::new(Stats::default()),
            trigger,
        };
        (Arc::new(st), dir)
    }

    // the daemon's main loop, on its own thread
    fn main_loop(st: Arc<Shared>) -> (Sender<IpcMsg>, thread::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel();
        let h = thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                if !apply(&st, msg) {
                    break;
                }
            }
        });
        (tx, h)
    }

    #[test]
    fn screen_op_switches_mode() {
        let (st, dir) = shared("screen");
        let (tx, _rx) = mpsc::channel();

        let r = handle_op(&json!({"op": "screen", "state": "off"}), &st, &tx);
        assert_eq!(r["ok"], json!(true));
        assert_eq!(r["data"]["mode"], json!("unlocking"));
        assert_eq!(r["data"]["changed"], json!(true));
        assert_eq!(st.gate.current_mode(), Mode::Unlocking);

        let r = handle_op(&json!({"op": "screen", "state": "off"}), &st, &tx);
        assert_eq!(r["data"]["changed"], json!(false));

        let r = handle_op(&json!({"op": "screen", "state": "dim"}), &st, &tx);
        assert_eq!(r["ok"], json!(false));
        assert_eq!(st.gate.current_mode(), Mode::Unlocking);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn set_publishes_to_gate_and_get_reads_back() {
        let (st, dir) = shared("set");
        let (tx, h) = main_loop(st.clone());
        assert!(!st.gate.is_enabled(Mode::Locking, GestureKind::DoubleTap));

        let r = handle_op(
            &json!({"op": "set", "key": "double_tap.sleep.enabled", "value": "on"}),
            &st,
            &tx,
        );
        assert_eq!(r["ok"], json!(true));
        assert!(st.gate.is_enabled(Mode::Locking, GestureKind::DoubleTap));

        let r = handle_op(&json!({"op": "get", "key": "double_tap.sleep.enabled"}), &st, &tx);
        assert_eq!(r["data"]["value"], json!(true));

        let r = handle_op(&json!({"op": "set", "key": "double_tap.sleep.tapz", "value": "3"}), &st, &tx);
        assert_eq!(r["ok"], json!(false));

        handle_op(&json!({"op": "shutdown"}), &st, &tx);
        h.join().unwrap();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn active_profile_change_on_disk_is_applied() {
        let (st, dir) = shared("watch");
        let active = st.cfg().active_path();
        assert!(!st.gate.is_enabled(Mode::Unlocking, GestureKind::Sweep));

        // some other file in the directory: ignored
        let other = dir.join("profiles").join("other.toml");
        fs::write(&other, "[sweep]\nwake_enabled = true\n").unwrap();
        assert!(apply(&st, IpcMsg::FileChanged(vec![other])));
        assert!(!st.gate.is_enabled(Mode::Unlocking, GestureKind::Sweep));

        fs::write(&active, "[sweep]\nwake_enabled = true\n").unwrap();
        assert!(apply(&st, IpcMsg::FileChanged(vec![active.clone()])));
        assert!(st.gate.is_enabled(Mode::Unlocking, GestureKind::Sweep));

        // a broken save keeps the last good profile
        fs::write(&active, "[sweep\n").unwrap();
        assert!(apply(&st, IpcMsg::FileChanged(vec![active])));
        assert!(st.gate.is_enabled(Mode::Unlocking, GestureKind::Sweep));

        assert!(!apply(&st, IpcMsg::Shutdown));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn status_reports_mode_and_live_thresholds() {
        let (st, dir) = shared("status");
        let (tx, _rx) = mpsc::channel();
        let r = handle_op(&json!({"op": "status"}), &st, &tx);
        assert_eq!(r["ok"], json!(true));
        assert_eq!(r["data"]["mode"], json!("locking"));
        assert_eq!(r["data"]["thresholds"]["double_tap"]["required_taps"], json!(2));
        assert_eq!(r["data"]["stats"]["fired"], json!(0));

        let r = handle_op(&json!({"op": "bogus"}), &st, &tx);
        assert_eq!(r["ok"], json!(false));
        let _ = fs::remove_dir_all(&dir);
    }
}
