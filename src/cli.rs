use anyhow::{Result, anyhow};
use pico_args::Arguments;
use serde_json::json;
use std::{env, process::Command, sync::Arc, time::Duration};

use crate::actions::{ActionTrigger, DeviceActions, PulsePlan, TriggerOutcome, UinputSink};
use crate::config::DaemonConfigState;
use crate::ipc;
use crate::mode::ModeGate;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("touchwake: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(json!({"op":"shutdown"})),
        Some("status") => request(json!({"op":"status"})),
        Some("reload") => request(json!({"op":"reload"})),
        Some("list") => request(json!({"op":"list"})),
        Some("doctor") => request(json!({"op":"doctor"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchwake use <profile_name>"))?;
            request(json!({"op":"use","profile":name}))
        }

        Some("screen") => {
            let state: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchwake screen <on|off>"))?;
            if state != "on" && state != "off" {
                return Err(anyhow!("usage: touchwake screen <on|off>"));
            }
            request(json!({"op":"screen","state":state}))
        }

        Some("get") => {
            let key: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchwake get <section.key>"))?;
            request(json!({"op":"get","key":key}))
        }

        Some("set") => {
            let key: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchwake set <section.key> <value>"))?;
            let value: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchwake set <section.key> <value>"))?;
            request(json!({"op":"set","key":key,"value":value}))
        }

        Some("emit") => {
            let what: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: touchwake emit power"))?;
            match what.as_str() {
                "power" => emit_power(),
                other => Err(anyhow!("unknown emit kind: {other}")),
            }
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

/// One pulse through the same trigger the daemon uses, with the active
/// profile's hold time and haptics.
fn emit_power() -> Result<()> {
    let cfg = DaemonConfigState::load_or_install_default()?;
    let settings = cfg.settings();
    let plan = PulsePlan {
        hold: settings.feedback.pulse,
        haptics: settings.feedback.haptics,
    };
    let gate = Arc::new(ModeGate::new(settings, false));
    let trigger = ActionTrigger::spawn(Box::new(DeviceActions::new(UinputSink::new()?, gate)))?;

    if trigger.try_fire(plan) != TriggerOutcome::Fired {
        return Err(anyhow!("power pulse could not be started"));
    }
    if !trigger.wait_idle(plan.hold * 2 + Duration::from_secs(1)) {
        return Err(anyhow!("power pulse did not finish"));
    }
    println!("ok: power key pulsed ({} ms)", plan.hold.as_millis());
    Ok(())
}

fn print_help() {
    println!(
        r#"touchwake - double-tap / sweep to wake daemon

USAGE:
  touchwake help [command]         Show general or command-specific help
  touchwake start                  Start the daemon
  touchwake stop                   Stop the daemon
  touchwake status                 Show mode, enabled gestures and counters
  touchwake reload                 Reload active profile
  touchwake use <name>             Switch active profile
  touchwake list                   List profiles
  touchwake doctor                 Diagnose permissions/devices
  touchwake screen <on|off>        Tell the daemon the display state
  touchwake get <section.key>      Read a profile value
  touchwake set <section.key> <v>  Override a profile value until next reload
  touchwake emit power             Pulse the power key once

TIPS:
  - Profiles: ~/.config/touchwake/profiles
  - Active profile pointer: ~/.config/touchwake/active
  - Log level: TOUCHWAKE_LOG=debug
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: touchwake start\nStarts the background daemon."),
        "stop" => println!("usage: touchwake stop\nStops the running daemon."),
        "status" => println!(
            "usage: touchwake status\nShows display mode, enabled gestures, counters, devices."
        ),
        "reload" => println!(
            "usage: touchwake reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: touchwake use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: touchwake list\nLists available profiles."),
        "doctor" => println!(
            "usage: touchwake doctor\nChecks uinput, input group, touch devices, vibrator and pocket sensor."
        ),
        "screen" => println!(
            "usage: touchwake screen <on|off>\noff arms the wake gestures, on arms the sleep gestures."
        ),
        "get" => println!("usage: touchwake get <section.key>\ne.g. touchwake get double_tap.wake.time_ms"),
        "set" => println!(
            "usage: touchwake set <section.key> <value>\ne.g. touchwake set sweep.wake_enabled on\nNot written to disk."
        ),
        "emit" => println!("usage: touchwake emit power\nSends one power key pulse via uinput."),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
