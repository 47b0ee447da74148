//! Merges per-axis position updates into whole samples.

use crate::gestures::Sample;
use crate::input::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Emit as soon as either axis moved; for panels that report one axis per tap.
    EitherAxis,
    /// Wait until both axes moved since the last sample.
    BothAxes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Sample(Sample),
    TrackLost,
    SlotChanged,
    Pending,
}

#[derive(Debug)]
pub struct SampleCoalescer {
    policy: DeliveryPolicy,
    x: i32,
    y: i32,
    x_dirty: bool,
    y_dirty: bool,
}

impl SampleCoalescer {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            x: 0,
            y: 0,
            x_dirty: false,
            y_dirty: false,
        }
    }

    pub fn push(&mut self, ev: RawEvent, at_ms: u64) -> Feed {
        match ev {
            RawEvent::PositionX(v) => {
                self.x = v;
                self.x_dirty = true;
            }
            RawEvent::PositionY(v) => {
                self.y = v;
                self.y_dirty = true;
            }
            RawEvent::TrackLost | RawEvent::SlotChanged => {
                self.x_dirty = false;
                self.y_dirty = false;
                return if ev == RawEvent::TrackLost {
                    Feed::TrackLost
                } else {
                    Feed::SlotChanged
                };
            }
            RawEvent::Ignored => return Feed::Pending,
        }

        let ready = match self.policy {
            DeliveryPolicy::EitherAxis => self.x_dirty || self.y_dirty,
            DeliveryPolicy::BothAxes => self.x_dirty && self.y_dirty,
        };
        if !ready {
            return Feed::Pending;
        }
        self.x_dirty = false;
        self.y_dirty = false;
        Feed::Sample(Sample {
            x: self.x,
            y: self.y,
            timestamp_ms: at_ms,
        })
    }
}
