//! Engine timing configuration

use shared::{
    ring_capacity, tick_interval, FrameIndex, DEFAULT_INPUT_DELAY, DEFAULT_INPUT_SLACK,
    DEFAULT_MAX_PREDICTION_FRAME, KEEPALIVE_INTERVAL,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tick interval must be non-zero")]
    ZeroInterval,

    #[error("max prediction frame must be at least 1")]
    ZeroPrediction,

    #[error("max prediction frame {max_prediction} must be below ring capacity {ring_capacity}")]
    PredictionExceedsRing {
        max_prediction: usize,
        ring_capacity: usize,
    },

    #[error("input delay must be between 1 and {max} frames, got {got}")]
    InputDelay { got: FrameIndex, max: FrameIndex },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    /// How far the prediction frame may run ahead of the authority frame.
    pub max_prediction_frame: usize,
    pub ring_capacity: usize,
    /// Longest the logic loop sleeps when nothing is due.
    pub idle_wait: Duration,
    /// Socket read timeout of the network loop; bounds outbound latency.
    pub network_poll: Duration,
    /// How long a gap in confirmed frames may persist before asking for a resend.
    pub resend_after: Duration,
    /// Frames between sampling a local input and the frame it is sent for.
    pub input_delay: FrameIndex,
    /// Longest the network loop stays silent before sending a heartbeat.
    pub keepalive: Duration,
}

impl EngineConfig {
    pub fn from_tick_rate(tick_rate: u32) -> Self {
        Self {
            tick_interval: tick_interval(tick_rate),
            max_prediction_frame: DEFAULT_MAX_PREDICTION_FRAME,
            ring_capacity: ring_capacity(tick_rate),
            idle_wait: Duration::from_millis(100),
            network_poll: Duration::from_millis(5),
            resend_after: tick_interval(tick_rate) * 4,
            input_delay: DEFAULT_INPUT_DELAY,
            keepalive: KEEPALIVE_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self.resend_after = interval * 4;
        self
    }

    pub fn with_max_prediction_frame(mut self, frames: usize) -> Self {
        self.max_prediction_frame = frames;
        self
    }

    pub fn with_input_delay(mut self, frames: FrameIndex) -> Self {
        self.input_delay = frames;
        self
    }

    /// Delays local input by the one-way trip plus a frame of margin, so it
    /// reaches the server before that frame is committed. Uses the current
    /// tick interval.
    pub fn with_input_delay_for_rtt(mut self, rtt: Duration) -> Self {
        let one_way = (rtt / 2).as_nanos();
        let tick = self.tick_interval.as_nanos().max(1);
        let frames = one_way.div_ceil(tick) + 1;
        self.input_delay = FrameIndex::try_from(frames)
            .unwrap_or(DEFAULT_INPUT_SLACK)
            .clamp(1, DEFAULT_INPUT_SLACK);
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.max_prediction_frame == 0 {
            return Err(ConfigError::ZeroPrediction);
        }
        if self.max_prediction_frame >= self.ring_capacity {
            return Err(ConfigError::PredictionExceedsRing {
                max_prediction: self.max_prediction_frame,
                ring_capacity: self.ring_capacity,
            });
        }
        let max_delay = (self.ring_capacity as FrameIndex - 1).min(DEFAULT_INPUT_SLACK);
        if self.input_delay < 1 || self.input_delay > max_delay {
            return Err(ConfigError::InputDelay {
                got: self.input_delay,
                max: max_delay,
            });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_tick_rate(shared::DEFAULT_TICK_RATE)
    }
}
