//! Display mode and the live settings snapshot shared with the recognizer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::info;
use serde::Serialize;

use crate::config::Settings;
use crate::gestures::doubletap::TapThresholds;
use crate::gestures::sweep::SweepThresholds;
use crate::gestures::{GestureKind, Mode};

/// Thresholds and enable flags for one display mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSettings {
    pub double_tap_enabled: bool,
    pub double_tap: TapThresholds,
    pub sweep_enabled: bool,
    pub sweep: SweepThresholds,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GestureSettings {
    pub unlocking: ModeSettings,
    pub locking: ModeSettings,
}

impl GestureSettings {
    pub fn for_mode(&self, mode: Mode) -> &ModeSettings {
        match mode {
            Mode::Unlocking => &self.unlocking,
            Mode::Locking => &self.locking,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ThresholdConfig {
    DoubleTap(TapThresholds),
    Sweep(SweepThresholds),
}

/// What the recognizer reads for one sample.
#[derive(Debug, Clone)]
pub struct GateSnapshot {
    pub mode: Mode,
    /// Bumped on every mode transition.
    pub epoch: u64,
    pub settings: Arc<Settings>,
}

/// Written by the screen notifier and the config store, read per sample.
///
/// The mode is encoded in the transition counter (odd count flips the
/// initial state) so a snapshot always sees a mode and epoch that agree.
#[derive(Debug)]
pub struct ModeGate {
    initially_blanked: bool,
    transitions: AtomicU64,
    settings: RwLock<Arc<Settings>>,
}

impl ModeGate {
    pub fn new(settings: Settings, blanked: bool) -> Self {
        Self {
            initially_blanked: blanked,
            transitions: AtomicU64::new(0),
            settings: RwLock::new(Arc::new(settings)),
        }
    }

    fn mode_at(&self, transitions: u64) -> Mode {
        let blanked = self.initially_blanked ^ (transitions % 2 == 1);
        if blanked { Mode::Unlocking } else { Mode::Locking }
    }

    pub fn current_mode(&self) -> Mode {
        self.mode_at(self.transitions.load(Ordering::Acquire))
    }

    /// Screen notifier entry point. Returns true when the mode actually changed.
    pub fn set_blanked(&self, blanked: bool) -> bool {
        let want = if blanked { Mode::Unlocking } else { Mode::Locking };
        let mut cur = self.transitions.load(Ordering::Acquire);
        loop {
            if self.mode_at(cur) == want {
                return false;
            }
            match self.transitions.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    info!("display {}; mode now {:?}", if blanked { "off" } else { "on" }, want);
                    return true;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace_settings(&self, settings: Settings) {
        let mut slot = self.settings.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(settings);
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let epoch = self.transitions.load(Ordering::Acquire);
        GateSnapshot {
            mode: self.mode_at(epoch),
            epoch,
            settings: self.settings(),
        }
    }

    pub fn thresholds(&self, mode: Mode, kind: GestureKind) -> ThresholdConfig {
        let settings = self.settings();
        let m = settings.gestures.for_mode(mode);
        match kind {
            GestureKind::DoubleTap => ThresholdConfig::DoubleTap(m.double_tap),
            GestureKind::Sweep => ThresholdConfig::Sweep(m.sweep),
        }
    }

    pub fn is_enabled(&self, mode: Mode, kind: GestureKind) -> bool {
        let settings = self.settings();
        let m = settings.gestures.for_mode(mode);
        match kind {
            GestureKind::DoubleTap => m.double_tap_enabled,
            GestureKind::Sweep => m.sweep_enabled,
        }
    }
}
