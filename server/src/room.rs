//! Per-match authority
//!
//! A room owns the seat list, the authority frame counter and the per-seat
//! input history. Once started it commits one frame per elapsed tick
//! interval, filling silent seats with their last known input, and keeps the
//! committed frames in a ring so lost broadcasts can be resent.

use crate::config::RoomConfig;
use log::{debug, trace};
use shared::{
    FrameClock, FrameData, FrameIndex, FrameInput, FrameRing, RingError, RoomId, SessionId,
    NOT_STARTED, READY_PROGRESS,
};
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error("room {room_id} fell {behind} frames behind real time (ring holds {capacity})")]
    Overrun {
        room_id: RoomId,
        behind: FrameIndex,
        capacity: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Seats assigned, waiting for everyone to report ready.
    Waiting,
    /// Clock started; frames are being committed.
    Active,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomPlayer {
    pub session_id: SessionId,
    pub slot: usize,
    /// Loading progress, 0..=100.
    pub progress: u8,
    pub online: bool,
}

impl RoomPlayer {
    pub fn is_ready(&self) -> bool {
        self.progress >= READY_PROGRESS
    }
}

/// Inputs received for one seat, keyed by frame.
#[derive(Debug, Default)]
struct SlotHistory {
    inputs: HashMap<FrameIndex, FrameInput>,
    last: FrameInput,
}

impl SlotHistory {
    fn insert(&mut self, frame: FrameIndex, input: FrameInput) {
        self.inputs.insert(frame, input);
    }

    /// Input for `frame`, or the last committed one, recorded under `frame` either way.
    fn resolve(&mut self, frame: FrameIndex) -> FrameInput {
        let input = *self.inputs.entry(frame).or_insert(self.last);
        self.last = input;
        input
    }

    fn prune(&mut self, before: FrameIndex) {
        self.inputs.retain(|frame, _| *frame >= before);
    }

    fn len(&self) -> usize {
        self.inputs.len()
    }
}

pub struct Room {
    id: RoomId,
    config: RoomConfig,
    seed: u64,
    players: Vec<RoomPlayer>,
    phase: RoomPhase,
    clock: Option<FrameClock>,
    authority_frame: FrameIndex,
    history: Vec<SlotHistory>,
    ring: FrameRing,
}

impl Room {
    /// Seats `sessions` in order; their slot is their position.
    pub fn new(id: RoomId, sessions: &[SessionId], config: RoomConfig, seed: u64) -> Self {
        let players = sessions
            .iter()
            .enumerate()
            .map(|(slot, &session_id)| RoomPlayer {
                session_id,
                slot,
                progress: 0,
                online: true,
            })
            .collect::<Vec<_>>();

        let width = config.capacity;
        Self {
            id,
            seed,
            players,
            phase: RoomPhase::Waiting,
            clock: None,
            authority_frame: NOT_STARTED,
            history: (0..width).map(|_| SlotHistory::default()).collect(),
            ring: FrameRing::new(config.ring_capacity, width),
            config,
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn authority_frame(&self) -> FrameIndex {
        self.authority_frame
    }

    pub fn clock(&self) -> Option<&FrameClock> {
        self.clock.as_ref()
    }

    pub fn players(&self) -> &[RoomPlayer] {
        &self.players
    }

    pub fn player(&self, session_id: SessionId) -> Option<&RoomPlayer> {
        self.players.iter().find(|p| p.session_id == session_id)
    }

    fn player_mut(&mut self, session_id: SessionId) -> Option<&mut RoomPlayer> {
        self.players.iter_mut().find(|p| p.session_id == session_id)
    }

    pub fn slot_of(&self, session_id: SessionId) -> Option<usize> {
        self.player(session_id).map(|p| p.slot)
    }

    pub fn online_sessions(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.players
            .iter()
            .filter(|p| p.online)
            .map(|p| p.session_id)
    }

    pub fn online_count(&self) -> usize {
        self.players.iter().filter(|p| p.online).count()
    }

    pub fn all_ready(&self) -> bool {
        self.players.len() == self.config.capacity && self.players.iter().all(RoomPlayer::is_ready)
    }

    /// Records loading progress; only meaningful while waiting.
    pub fn set_progress(&mut self, session_id: SessionId, progress: u8) -> bool {
        if self.phase != RoomPhase::Waiting {
            return false;
        }
        match self.player_mut(session_id) {
            Some(player) => {
                player.progress = progress.min(READY_PROGRESS);
                true
            }
            None => false,
        }
    }

    /// Starts the clock; frame 0 becomes due at `start_time`.
    pub fn start(&mut self, start_time: Instant) {
        self.clock = Some(FrameClock::new(start_time, 0, self.config.tick_interval));
        self.phase = RoomPhase::Active;
    }

    pub fn set_online(&mut self, session_id: SessionId, online: bool) -> bool {
        match self.player_mut(session_id) {
            Some(player) => {
                player.online = online;
                true
            }
            None => false,
        }
    }

    pub fn end(&mut self) {
        self.phase = RoomPhase::Ended;
    }

    /// Buffers one seat's input for `frame`. Returns false (and keeps
    /// nothing) for stale, too-far-ahead or malformed input.
    pub fn submit_input(&mut self, session_id: SessionId, frame: FrameIndex, word: u32) -> bool {
        if self.phase != RoomPhase::Active {
            return false;
        }
        let Some(slot) = self.slot_of(session_id) else {
            return false;
        };

        let input = FrameInput::from_raw(word);
        if frame <= self.authority_frame
            || frame > self.authority_frame + self.config.input_slack
            || !input.is_well_formed()
        {
            trace!(
                "Room {} dropped input for frame {} from session {} (authority {})",
                self.id,
                frame,
                session_id,
                self.authority_frame
            );
            return false;
        }

        self.history[slot].insert(frame, input);
        true
    }

    /// Commits every frame that is due by `now`, up to the catch-up bound.
    pub fn tick(&mut self, now: Instant) -> Result<Vec<FrameData>, RoomError> {
        let Some(clock) = self.clock.filter(|_| self.phase == RoomPhase::Active) else {
            return Ok(Vec::new());
        };

        let due = clock.frame_at(now);
        let behind = due - self.authority_frame;
        if behind > self.config.ring_capacity as FrameIndex {
            return Err(RoomError::Overrun {
                room_id: self.id,
                behind,
                capacity: self.config.ring_capacity,
            });
        }

        let count = behind.clamp(0, self.config.max_catch_up as FrameIndex);
        let mut committed = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let frame = self.authority_frame + 1;
            let inputs = self
                .history
                .iter_mut()
                .map(|slot| slot.resolve(frame))
                .collect();
            let data = FrameData { frame, inputs };

            self.ring.commit(data.clone())?;
            self.authority_frame = frame;
            committed.push(data);
        }

        if !committed.is_empty() {
            let horizon = self.authority_frame - self.config.ring_capacity as FrameIndex;
            for slot in &mut self.history {
                slot.prune(horizon);
            }
        }
        if count > 1 {
            debug!("Room {} caught up {} frames", self.id, count);
        }

        Ok(committed)
    }

    /// Committed frames from `from_frame` on that the ring still holds.
    pub fn resend(&self, from_frame: FrameIndex, limit: usize) -> Vec<FrameData> {
        let mut frames = self.ring.confirmed_since(from_frame.max(0));
        frames.truncate(limit);
        frames
    }

    pub fn confirmed(&self, frame: FrameIndex) -> Option<&FrameData> {
        self.ring.try_get_confirmed(frame)
    }

    /// Buffered input entries across all seats.
    pub fn buffered_inputs(&self) -> usize {
        self.history.iter().map(SlotHistory::len).sum()
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("authority_frame", &self.authority_frame)
            .field("players", &self.players)
            .finish()
    }
}
