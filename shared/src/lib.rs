//! # Lockstep Shared Library
//!
//! Types used by both the prediction client and the room server. Everything
//! here is deterministic value plumbing: how an input is packed, how a tick's
//! inputs are grouped, how ticks map onto wall-clock time, where confirmed
//! ticks are kept, and what goes on the wire.
//!
//! ## Modules
//!
//! - `input` - [`FrameInput`], the 32-bit packed per-player input word
//! - `frame` - [`FrameData`], one tick's input vector
//! - `clock` - [`FrameClock`], frame index <-> instant mapping
//! - `ring` - [`FrameRing`], fixed-capacity store of confirmed frames
//! - `pool` - [`SnapshotPool`], generational freelist for snapshots
//! - `sim` - the [`Simulation`] step-function seam and a reference digest
//! - `protocol` - [`Packet`] and its bincode codec
//! - `time` - wire timestamp helpers

pub mod clock;
pub mod frame;
pub mod input;
pub mod pool;
pub mod protocol;
pub mod ring;
pub mod sim;
pub mod time;

pub use clock::FrameClock;
pub use frame::{FrameData, FrameIndex, NOT_STARTED};
pub use input::{FrameInput, MAX_SLOT, NO_SLOT};
pub use pool::{SnapshotHandle, SnapshotPool};
pub use protocol::{CodecError, MatchStatus, Packet, RoomId, SessionId};
pub use ring::{FrameRing, RingError};
pub use sim::{DigestState, InputDigest, Simulation};

use std::time::Duration;

pub const DEFAULT_TICK_RATE: u32 = 20;

/// Seconds of confirmed history a ring holds.
pub const RING_SECONDS: usize = 60;

pub const DEFAULT_MAX_PREDICTION_FRAME: usize = 10;

pub const DEFAULT_ROOM_CAPACITY: usize = 2;

pub const DEFAULT_START_COUNTDOWN: Duration = Duration::from_secs(3);

/// How many frames ahead of the authority a client input may be and still be buffered.
pub const DEFAULT_INPUT_SLACK: FrameIndex = 30;

/// Readiness progress that counts as "ready".
pub const READY_PROGRESS: u8 = 100;

/// Longest a connected client stays silent before sending a heartbeat.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(500);

/// Frames of local input delay used until a round trip has been measured.
pub const DEFAULT_INPUT_DELAY: FrameIndex = 2;

pub fn tick_interval(tick_rate: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / tick_rate.max(1) as u64)
}

pub fn ring_capacity(tick_rate: u32) -> usize {
    tick_rate.max(1) as usize * RING_SECONDS
}
