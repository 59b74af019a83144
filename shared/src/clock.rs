//! Frame index <-> wall-clock mapping

use crate::frame::FrameIndex;
use std::time::{Duration, Instant};

/// Maps frames to instants: `frame_time(f) = start_time + (f - start_frame) * interval`.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    start_time: Instant,
    start_frame: FrameIndex,
    interval: Duration,
}

impl FrameClock {
    pub fn new(start_time: Instant, start_frame: FrameIndex, interval: Duration) -> Self {
        Self {
            start_time,
            start_frame,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn start_frame(&self) -> FrameIndex {
        self.start_frame
    }

    /// Instant at which `frame` becomes due.
    pub fn frame_time(&self, frame: FrameIndex) -> Instant {
        let delta = frame - self.start_frame;
        let offset = self.interval * delta.unsigned_abs().min(u32::MAX as u64) as u32;
        if delta >= 0 {
            self.start_time + offset
        } else {
            self.start_time
                .checked_sub(offset)
                .unwrap_or(self.start_time)
        }
    }

    /// Latest frame whose due time is `<= now`; `start_frame - 1` before the clock starts.
    pub fn frame_at(&self, now: Instant) -> FrameIndex {
        match now.checked_duration_since(self.start_time) {
            Some(elapsed) if !self.interval.is_zero() => {
                self.start_frame + (elapsed.as_nanos() / self.interval.as_nanos()) as FrameIndex
            }
            Some(_) => self.start_frame,
            None => self.start_frame - 1,
        }
    }

    /// Switches to `interval` from `at_frame` on; the mapping stays continuous there.
    pub fn change_interval(&mut self, interval: Duration, at_frame: FrameIndex) {
        self.start_time = self.frame_time(at_frame);
        self.start_frame = at_frame;
        self.interval = interval;
    }

    /// Rebinds both anchors.
    pub fn reset(&mut self, time: Instant, frame: FrameIndex) {
        self.start_time = time;
        self.start_frame = frame;
    }
}
