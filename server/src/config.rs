//! Server and room settings

use shared::{
    ring_capacity, tick_interval, FrameIndex, DEFAULT_INPUT_SLACK, DEFAULT_ROOM_CAPACITY,
    DEFAULT_START_COUNTDOWN, DEFAULT_TICK_RATE, KEEPALIVE_INTERVAL, MAX_SLOT,
};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tick rate must be non-zero")]
    ZeroTickRate,

    #[error("room capacity must be between 1 and {max}, got {got}")]
    Capacity { got: usize, max: usize },

    #[error("input slack must be positive")]
    InputSlack,

    #[error("catch-up bound must be at least 1")]
    CatchUp,

    #[error("ring capacity {ring_capacity} must exceed input slack {input_slack}")]
    RingTooSmall {
        ring_capacity: usize,
        input_slack: FrameIndex,
    },

    #[error("session timeout {0:?} must exceed the client keepalive interval")]
    SessionTimeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// Seats per room; also the matchmaking group size.
    pub capacity: usize,
    pub tick_interval: Duration,
    /// Delay between everyone being ready and frame 0.
    pub start_countdown: Duration,
    /// Furthest ahead of the authority frame an input is buffered.
    pub input_slack: FrameIndex,
    pub ring_capacity: usize,
    /// Most frames a room commits in one driver pass.
    pub max_catch_up: usize,
}

impl RoomConfig {
    pub fn from_tick_rate(tick_rate: u32) -> Self {
        Self {
            capacity: DEFAULT_ROOM_CAPACITY,
            tick_interval: tick_interval(tick_rate),
            start_countdown: DEFAULT_START_COUNTDOWN,
            input_slack: DEFAULT_INPUT_SLACK,
            ring_capacity: ring_capacity(tick_rate),
            max_catch_up: 8,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickRate);
        }
        let max = MAX_SLOT as usize + 1;
        if self.capacity == 0 || self.capacity > max {
            return Err(ConfigError::Capacity {
                got: self.capacity,
                max,
            });
        }
        if self.input_slack <= 0 {
            return Err(ConfigError::InputSlack);
        }
        if self.max_catch_up == 0 {
            return Err(ConfigError::CatchUp);
        }
        if self.ring_capacity as FrameIndex <= self.input_slack {
            return Err(ConfigError::RingTooSmall {
                ring_capacity: self.ring_capacity,
                input_slack: self.input_slack,
            });
        }
        Ok(())
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self::from_tick_rate(DEFAULT_TICK_RATE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Silence after which a session is dropped.
    pub session_timeout: Duration,
    /// Upper bound on concurrent sessions.
    pub max_sessions: usize,
    pub room: RoomConfig,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr, room: RoomConfig) -> Self {
        Self {
            bind_addr,
            session_timeout: Duration::from_secs(5),
            max_sessions: 256,
            room,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_timeout <= KEEPALIVE_INTERVAL {
            return Err(ConfigError::SessionTimeout(self.session_timeout));
        }
        self.room.validate()
    }
}
