use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use crate::gestures::doubletap::TapThresholds;
use crate::gestures::sweep::{Axis, SweepThresholds};
use crate::gestures::{Mode, Region};
use crate::input::{self, LiftPredicate};
use crate::mode::{GestureSettings, ModeSettings};

// --------- raw profile, as written in TOML ----------
// Numbers are read wide and narrowed in `Settings::from_profile`, so an
// out-of-range value gets clamped instead of failing the whole file.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Meta {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TapSection {
    pub enabled: bool,
    pub taps: i64,
    pub accuracy: i64,
    pub time_ms: i64,
    pub region: Region,
}

impl Default for TapSection {
    fn default() -> Self {
        Self {
            enabled: false,
            taps: 2,
            accuracy: 50,
            time_ms: 600,
            region: Region { up: 0, down: 960, left: 0, right: 540 },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DoubleTapSection {
    pub wake: TapSection,
    pub sleep: TapSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSection {
    pub gate1_near: i64,
    pub gate1_far: i64,
    pub gate2_far: i64,
    pub region: Region,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisGates {
    pub wake: GateSection,
    pub sleep: GateSection,
}

impl AxisGates {
    fn horizontal() -> Self {
        let region = Region { up: 600, down: 950, left: 0, right: 540 };
        Self {
            wake: GateSection { gate1_near: 0, gate1_far: 120, gate2_far: 420, region },
            sleep: GateSection { gate1_near: 540, gate1_far: 420, gate2_far: 120, region },
        }
    }

    fn vertical() -> Self {
        let region = Region { up: 0, down: 960, left: 120, right: 420 };
        Self {
            wake: GateSection { gate1_near: 0, gate1_far: 600, gate2_far: 950, region },
            sleep: GateSection { gate1_near: 960, gate1_far: 950, gate2_far: 600, region },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepSection {
    pub axis: Axis,
    pub wake_enabled: bool,
    pub sleep_enabled: bool,
    pub horizontal: AxisGates,
    pub vertical: AxisGates,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            axis: Axis::Horizontal,
            wake_enabled: false,
            sleep_enabled: false,
            horizontal: AxisGates::horizontal(),
            vertical: AxisGates::vertical(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedbackSection {
    pub haptics: bool,
    pub pulse_ms: i64,
    pub vibrator_path: String,
}

impl Default for FeedbackSection {
    fn default() -> Self {
        Self {
            haptics: true,
            pulse_ms: 60,
            vibrator_path: "/sys/class/timed_output/vibrator/enable".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputSection {
    /// Substrings matched against device names; empty accepts any touchscreen.
    pub device_names: Vec<String>,
    pub vendor_lift: bool,
    pub lift_code: i64,
    pub lift_value: i64,
}

impl Default for InputSection {
    fn default() -> Self {
        Self {
            device_names: vec!["touch".into(), "mtk-tpd".into()],
            vendor_lift: true,
            lift_code: 330,
            lift_value: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PocketSection {
    /// Proximity state file; non-zero content means covered. Empty disables.
    pub sensor_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub meta: Meta,
    pub double_tap: DoubleTapSection,
    pub sweep: SweepSection,
    pub feedback: FeedbackSection,
    pub input: InputSection,
    pub pocket: PocketSection,
}

// --------- validated runtime settings ----------

#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub haptics: bool,
    /// Key hold time and vibration length.
    pub pulse: Duration,
    pub vibrator_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub gestures: GestureSettings,
    pub feedback: Feedback,
    pub pocket_sensor: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_profile(&Profile::default())
    }
}

impl Settings {
    /// Never fails: bad values are clamped or replaced by defaults with a warning.
    pub fn from_profile(p: &Profile) -> Self {
        let sweep_axis = p.sweep.axis;
        let gates = match sweep_axis {
            Axis::Horizontal => &p.sweep.horizontal,
            Axis::Vertical => &p.sweep.vertical,
        };

        let mode = |tap: &TapSection, gate: &GateSection, sweep_enabled: bool, what: &str| {
            ModeSettings {
                double_tap_enabled: tap.enabled,
                double_tap: tap_thresholds(tap, what),
                sweep_enabled,
                sweep: SweepThresholds {
                    axis: sweep_axis,
                    region: gate.region,
                    gate1_near: coord(gate.gate1_near, what, "gate1_near"),
                    gate1_far: coord(gate.gate1_far, what, "gate1_far"),
                    gate2_far: coord(gate.gate2_far, what, "gate2_far"),
                },
            }
        };

        let pulse_ms = if (1..=1000).contains(&p.feedback.pulse_ms) {
            p.feedback.pulse_ms as u64
        } else {
            let clamped = p.feedback.pulse_ms.clamp(1, 1000) as u64;
            warn!("feedback.pulse_ms={} out of 1..=1000; using {clamped}", p.feedback.pulse_ms);
            clamped
        };

        let sensor = p.pocket.sensor_path.trim();
        Self {
            gestures: GestureSettings {
                unlocking: mode(&p.double_tap.wake, &gates.wake, p.sweep.wake_enabled, "wake"),
                locking: mode(&p.double_tap.sleep, &gates.sleep, p.sweep.sleep_enabled, "sleep"),
            },
            feedback: Feedback {
                haptics: p.feedback.haptics,
                pulse: Duration::from_millis(pulse_ms),
                vibrator_path: PathBuf::from(&p.feedback.vibrator_path),
            },
            pocket_sensor: (!sensor.is_empty()).then(|| PathBuf::from(sensor)),
        }
    }

    pub fn for_mode(&self, mode: Mode) -> &ModeSettings {
        self.gestures.for_mode(mode)
    }
}

fn tap_thresholds(t: &TapSection, what: &str) -> TapThresholds {
    let required_taps = if t.taps < 2 {
        warn!("double_tap.{what}.taps={} is below 2; using 2", t.taps);
        2
    } else {
        t.taps.min(u32::MAX as i64) as u32
    };
    TapThresholds {
        max_deviation: non_negative(t.accuracy, 50, what, "accuracy").min(u32::MAX as u64) as u32,
        max_interval_ms: non_negative(t.time_ms, 600, what, "time_ms"),
        required_taps,
        region: t.region,
    }
}

fn non_negative(raw: i64, default: u64, what: &str, field: &str) -> u64 {
    if raw < 0 {
        warn!("double_tap.{what}.{field}={raw} is negative; using {default}");
        default
    } else {
        raw as u64
    }
}

fn coord(raw: i64, what: &str, field: &str) -> i32 {
    let c = raw.clamp(i32::MIN as i64, i32::MAX as i64);
    if c != raw {
        warn!("sweep.{what}.{field}={raw} out of range; clamped to {c}");
    }
    c as i32
}

impl Profile {
    pub fn lift_predicate(&self) -> LiftPredicate {
        if !self.input.vendor_lift {
            return LiftPredicate::new(None);
        }
        match (
            u16::try_from(self.input.lift_code),
            i32::try_from(self.input.lift_value),
        ) {
            (Ok(code), Ok(value)) => LiftPredicate::new(Some((code, value))),
            _ => {
                warn!(
                    "input.lift_code/lift_value ({}, {}) out of range; vendor lift disabled",
                    self.input.lift_code, self.input.lift_value
                );
                LiftPredicate::new(None)
            }
        }
    }
}

// --------- runtime parameter overrides ----------

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("unknown parameter '{0}'")]
    UnknownKey(String),
    #[error("parameter '{key}' rejected: {reason}")]
    Rejected { key: String, reason: String },
}

fn rejected(key: &str, reason: impl ToString) -> ParamError {
    ParamError::Rejected {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn profile_value(profile: &Profile, key: &str) -> Result<toml::Value, ParamError> {
    toml::Value::try_from(profile).map_err(|e| rejected(key, e))
}

fn lookup_mut<'a>(root: &'a mut toml::Value, key: &str) -> Result<&'a mut toml::Value, ParamError> {
    let mut cur = root;
    for seg in key.split('.') {
        cur = match cur.get_mut(seg) {
            Some(v) => v,
            None => return Err(ParamError::UnknownKey(key.to_string())),
        };
    }
    Ok(cur)
}

/// Reads one dotted parameter, e.g. `double_tap.wake.taps`.
pub fn get_param(profile: &Profile, key: &str) -> Result<toml::Value, ParamError> {
    let mut root = profile_value(profile, key)?;
    lookup_mut(&mut root, key).map(|v| v.clone())
}

/// Returns a copy of `profile` with one dotted parameter replaced. The new
/// value must have the same TOML type as the old one; booleans also accept
/// `0`/`1`, lists take comma-separated items.
pub fn set_param(profile: &Profile, key: &str, raw: &str) -> Result<Profile, ParamError> {
    let mut root = profile_value(profile, key)?;
    let slot = lookup_mut(&mut root, key)?;
    let raw = raw.trim();
    let value = match &*slot {
        toml::Value::Boolean(_) => match raw {
            "1" | "true" | "on" => toml::Value::Boolean(true),
            "0" | "false" | "off" => toml::Value::Boolean(false),
            _ => return Err(rejected(key, "expected a boolean")),
        },
        toml::Value::Integer(_) => toml::Value::Integer(
            raw.parse::<i64>()
                .map_err(|_| rejected(key, "expected an integer"))?,
        ),
        toml::Value::String(_) => toml::Value::String(raw.to_string()),
        toml::Value::Array(_) => toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_string()))
                .collect(),
        ),
        toml::Value::Table(_) => return Err(rejected(key, "is a section, not a value")),
        _ => return Err(rejected(key, "unsupported value type")),
    };
    *slot = value;
    root.try_into::<Profile>().map_err(|e| rejected(key, e))
}

// --------- profile store on disk ----------

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
    pub detected_devices: Vec<String>,
}

pub fn config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .ok_or_else(|| anyhow!("cannot resolve home directory"))?
        .home_dir()
        .to_path_buf();
    Ok(home.join(".config").join("touchwake"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_from(config_dir()?)
    }

    pub fn load_from(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;
        let detected_devices = input::discover_touchscreens(&profile.input.device_names)
            .into_iter()
            .map(|d| format!("{} ({})", d.name, d.path))
            .collect();

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
            detected_devices,
        })
    }

    pub fn settings(&self) -> Settings {
        Settings::from_profile(&self.profile)
    }

    pub fn active_path(&self) -> PathBuf {
        self.profiles_dir.join(format!("{}.toml", self.active_name))
    }

    /// Re-reads the active profile; on error the current one stays.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    /// In-memory only; the next reload from disk discards it.
    pub fn set_param(&mut self, key: &str, raw: &str) -> Result<(), ParamError> {
        self.profile = set_param(&self.profile, key, raw)?;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                if let Some(ext) = e.path().extension() {
                    if ext == "toml" {
                        if let Some(stem) = e.path().file_stem().and_then(|s| s.to_str()) {
                            v.push(stem.to_string());
                        }
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        let vibrator = &self.profile.feedback.vibrator_path;
        let pocket = &self.profile.pocket.sensor_path;
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "devices": self.detected_devices,
            "vibrator": { "path": vibrator, "present": Path::new(vibrator).exists() },
            "pocket_sensor": if pocket.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::json!({ "path": pocket, "present": Path::new(pocket).exists() })
            },
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
            }
        })
    }
}

fn load_profile(profiles_dir: &Path, name: &str) -> Result<Profile> {
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    let profile: Profile =
        toml::from_str(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(profile)
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:") {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}
