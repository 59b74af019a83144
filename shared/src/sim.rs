//! Step-function seam between the netcode and the game
//!
//! The engines never look inside a snapshot. They clone it, advance it with
//! [`Simulation::step`] and throw it away. Implementations must be pure and
//! deterministic: the same snapshot and frame always produce the same
//! result on every machine, or client and server histories diverge.

use crate::frame::{FrameData, FrameIndex, NOT_STARTED};

pub trait Simulation: Send + Sync + 'static {
    type Snapshot: Clone + Send + Sync + 'static;

    /// Advances `snapshot` by one tick using every seat's input for that tick.
    fn step(&self, snapshot: &Self::Snapshot, frame: &FrameData) -> Self::Snapshot;
}

impl<T: Simulation> Simulation for std::sync::Arc<T> {
    type Snapshot = T::Snapshot;

    fn step(&self, snapshot: &Self::Snapshot, frame: &FrameData) -> Self::Snapshot {
        (**self).step(snapshot, frame)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Rolling digest of every input applied so far.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DigestState {
    pub frame: FrameIndex,
    pub hash: u64,
    /// Per-seat running sum of yaw values.
    pub yaw_totals: Vec<u64>,
    /// Per-seat count of ticks with any button held.
    pub active_ticks: Vec<u64>,
}

impl DigestState {
    pub fn new(width: usize, seed: u64) -> Self {
        Self {
            frame: NOT_STARTED,
            hash: FNV_OFFSET ^ seed,
            yaw_totals: vec![0; width],
            active_ticks: vec![0; width],
        }
    }
}

/// Reference simulation that folds inputs into a hash. Two peers fed the same
/// history end with the same [`DigestState`]; any divergence shows up in `hash`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputDigest;

fn mix(hash: u64, value: u64) -> u64 {
    value
        .to_le_bytes()
        .iter()
        .fold(hash, |h, byte| (h ^ *byte as u64).wrapping_mul(FNV_PRIME))
}

impl Simulation for InputDigest {
    type Snapshot = DigestState;

    fn step(&self, snapshot: &DigestState, frame: &FrameData) -> DigestState {
        let mut next = snapshot.clone();
        next.frame = frame.frame;
        next.hash = mix(next.hash, frame.frame as u64);

        for (seat, input) in frame.inputs.iter().enumerate() {
            next.hash = mix(next.hash, input.raw() as u64);
            if let Some(total) = next.yaw_totals.get_mut(seat) {
                *total += input.yaw() as u64;
            }
            if input.is_pressed(u8::MAX) {
                if let Some(count) = next.active_ticks.get_mut(seat) {
                    *count += 1;
                }
            }
        }

        next
    }
}

/// Applies `frames` in order starting from `initial`.
pub fn run<S: Simulation>(sim: &S, initial: &S::Snapshot, frames: &[FrameData]) -> S::Snapshot {
    frames
        .iter()
        .fold(initial.clone(), |state, frame| sim.step(&state, frame))
}
