//! Touch device discovery and raw event classification (evdev 0.13).

use evdev::{AbsoluteAxisCode, Device, EventType, InputEvent};

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
}

/// What the recognizer cares about in an evdev event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEvent {
    PositionX(i32),
    PositionY(i32),
    /// The tracked contact lifted.
    TrackLost,
    /// A second contact showed up; outside single-touch tracking.
    SlotChanged,
    Ignored,
}

/// A raw event stamped on arrival, in ms since the reader started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub event: RawEvent,
    pub at_ms: u64,
}

/// Vendor fallback for panels that never invalidate their slot on lift.
/// Synaptics s3203 reports `BTN_TOUCH` (330) = 0 instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftPredicate {
    vendor: Option<(u16, i32)>,
}

impl LiftPredicate {
    pub fn new(vendor: Option<(u16, i32)>) -> Self {
        Self { vendor }
    }

    pub fn is_track_lost(&self, code: u16, value: i32) -> bool {
        self.vendor == Some((code, value))
    }
}

pub fn classify(ev: &InputEvent, lift: &LiftPredicate) -> RawEvent {
    classify_parts(ev.event_type(), ev.code(), ev.value(), lift)
}

pub fn classify_parts(ty: EventType, code: u16, value: i32, lift: &LiftPredicate) -> RawEvent {
    if ty == EventType::SYNCHRONIZATION {
        return RawEvent::Ignored;
    }
    if ty == EventType::ABSOLUTE {
        match code {
            c if c == AbsoluteAxisCode::ABS_MT_POSITION_X.0 => return RawEvent::PositionX(value),
            c if c == AbsoluteAxisCode::ABS_MT_POSITION_Y.0 => return RawEvent::PositionY(value),
            c if c == AbsoluteAxisCode::ABS_MT_TRACKING_ID.0 && value == -1 => {
                return RawEvent::TrackLost;
            }
            c if c == AbsoluteAxisCode::ABS_MT_SLOT.0 && value != 0 => {
                return RawEvent::SlotChanged;
            }
            _ => {}
        }
    }
    if lift.is_track_lost(code, value) {
        return RawEvent::TrackLost;
    }
    RawEvent::Ignored
}

/// Multitouch devices whose name contains one of `name_filters`
/// (all of them when the filter list is empty).
pub fn discover_touchscreens(name_filters: &[String]) -> Vec<DeviceInfo> {
    let mut out = vec![];
    if let Ok(rd) = std::fs::read_dir("/dev/input") {
        for e in rd.flatten() {
            let p = e.path();
            if p.file_name()
                .and_then(|s| s.to_str())
                .map(|s| s.starts_with("event"))
                .unwrap_or(false)
            {
                if let Ok(dev) = Device::open(&p) {
                    let has_abs = dev.supported_events().contains(EventType::ABSOLUTE);
                    let axes = dev.supported_absolute_axes();
                    let has_mt = axes.map_or(false, |a| {
                        a.contains(AbsoluteAxisCode::ABS_MT_POSITION_X)
                            && a.contains(AbsoluteAxisCode::ABS_MT_POSITION_Y)
                    });
                    let name = dev.name().unwrap_or("unknown").to_string();
                    if has_abs && has_mt && name_matches(&name, name_filters) {
                        out.push(DeviceInfo {
                            path: p.display().to_string(),
                            name,
                        });
                    }
                }
            }
        }
    }
    out
}

fn name_matches(name: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| name.contains(f.as_str()))
}
