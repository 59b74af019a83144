//! Client-side prediction and rollback reconciliation
//!
//! The [`Predictor`] owns every piece of mutable engine state and is driven
//! by exactly one thread. Each call to [`Predictor::tick`] runs two phases:
//!
//! 1. **Prediction** - while the next frame is due on the wall clock and the
//!    prediction window is not exhausted, sample the local input for the frame
//!    `input_delay` ahead, synthesize the due frame from the latest confirmed
//!    inputs (our own seat carrying the input sampled for it earlier), step the
//!    prediction snapshot and queue both the frame and a copy of the result.
//!    Each frame's local input is sampled once, so replays after a rollback
//!    reuse it and nothing is sent twice.
//! 2. **Reconciliation** - consume confirmed frames in strict order. A confirmed
//!    frame equal to the queued prediction promotes the queued snapshot to
//!    authority without re-simulating. A mismatch recomputes authority from the
//!    previous authority snapshot, throws away every queued prediction, restarts
//!    prediction from the corrected authority and replays any further confirmed
//!    frames already waiting in the backlog.

use crate::config::EngineConfig;
use crate::error::EngineError;
use log::{debug, trace};
use shared::{
    FrameClock, FrameData, FrameIndex, FrameInput, FrameRing, Simulation, SnapshotHandle,
    SnapshotPool, NOT_STARTED,
};
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

/// What one logic tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Newly predicted frames.
    pub predicted: Vec<FrameIndex>,
    /// Local inputs sampled this tick, keyed by the frame they apply to.
    pub scheduled: Vec<(FrameIndex, FrameInput)>,
    /// Confirmed frames consumed.
    pub confirmed: usize,
    pub rollbacks: usize,
}

/// Running totals, mostly for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PredictorStats {
    pub predicted: u64,
    pub confirmed: u64,
    pub rollbacks: u64,
    pub replayed: u64,
    pub dropped: u64,
}

pub struct Predictor<S: Simulation> {
    sim: S,
    config: EngineConfig,
    clock: FrameClock,
    ring: FrameRing,
    pool: SnapshotPool<S::Snapshot>,
    local_slot: Option<usize>,

    authority_frame: FrameIndex,
    prediction_frame: FrameIndex,
    authority_entity: SnapshotHandle,
    prediction_entity: SnapshotHandle,

    predicted_frames: VecDeque<FrameData>,
    predicted_snapshots: VecDeque<SnapshotHandle>,
    backlog: BTreeMap<FrameIndex, FrameData>,

    /// Sampled local inputs for frames past the authority.
    local_inputs: BTreeMap<FrameIndex, FrameInput>,
    scheduled_through: FrameIndex,

    stats: PredictorStats,
}

impl<S: Simulation> Predictor<S> {
    /// `width` is the seat count of the match; `local_slot` is our seat, if any.
    pub fn new(
        sim: S,
        initial: S::Snapshot,
        width: usize,
        local_slot: Option<usize>,
        clock: FrameClock,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if let Some(slot) = local_slot {
            if slot >= width {
                return Err(EngineError::SlotOutOfRange { slot, width });
            }
        }

        let mut pool = SnapshotPool::with_capacity(config.max_prediction_frame * 2 + 4);
        let authority_entity = pool.insert(initial.clone());
        let prediction_entity = pool.insert(initial);

        Ok(Self {
            sim,
            ring: FrameRing::new(config.ring_capacity, width),
            predicted_frames: VecDeque::with_capacity(config.max_prediction_frame),
            predicted_snapshots: VecDeque::with_capacity(config.max_prediction_frame),
            config,
            clock,
            pool,
            local_slot,
            authority_frame: NOT_STARTED,
            prediction_frame: NOT_STARTED,
            authority_entity,
            prediction_entity,
            backlog: BTreeMap::new(),
            local_inputs: BTreeMap::new(),
            scheduled_through: NOT_STARTED,
            stats: PredictorStats::default(),
        })
    }

    pub fn authority_frame(&self) -> FrameIndex {
        self.authority_frame
    }

    pub fn prediction_frame(&self) -> FrameIndex {
        self.prediction_frame
    }

    pub fn prediction_snapshot(&self) -> Option<&S::Snapshot> {
        self.pool.get(self.prediction_entity)
    }

    pub fn authority_snapshot(&self) -> Option<&S::Snapshot> {
        self.pool.get(self.authority_entity)
    }

    /// Predicted frames not yet confirmed, oldest first.
    pub fn pending_predictions(&self) -> impl Iterator<Item = &FrameData> {
        self.predicted_frames.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.predicted_frames.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// The local input sampled for `frame`, while that frame is unconfirmed.
    pub fn scheduled_input(&self, frame: FrameIndex) -> Option<FrameInput> {
        self.local_inputs.get(&frame).copied()
    }

    /// Snapshots currently held by the pool.
    pub fn live_snapshots(&self) -> usize {
        self.pool.live()
    }

    pub fn stats(&self) -> PredictorStats {
        self.stats
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn window_open(&self) -> bool {
        self.prediction_frame - self.authority_frame < self.config.max_prediction_frame as FrameIndex
    }

    /// When the next frame becomes due, or `None` while the prediction window is full.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.window_open()
            .then(|| self.clock.frame_time(self.prediction_frame + 1))
    }

    /// Re-anchors the clock so the next prediction frame is due at `now`.
    pub fn reanchor(&mut self, now: Instant) {
        self.clock.reset(now, self.prediction_frame + 1);
    }

    /// First frame the reconciliation phase is waiting on when later frames
    /// have already arrived.
    pub fn missing_frame(&self) -> Option<FrameIndex> {
        let wanted = self.authority_frame + 1;
        match self.backlog.keys().next() {
            Some(&first) if first > wanted => Some(wanted),
            _ => None,
        }
    }

    /// Queues a confirmed frame from the network. Stale, duplicate, malformed
    /// and too-far-ahead frames are dropped; returns whether it was kept.
    pub fn receive(&mut self, data: FrameData) -> bool {
        let horizon = self.authority_frame + self.ring.capacity() as FrameIndex;
        if data.frame <= self.authority_frame
            || data.frame > horizon
            || data.width() != self.ring.width()
            || self.backlog.contains_key(&data.frame)
        {
            trace!("Dropping confirmed frame {}", data.frame);
            self.stats.dropped += 1;
            return false;
        }
        self.backlog.insert(data.frame, data);
        true
    }

    /// Runs the prediction phase, then the reconciliation phase.
    pub fn tick(&mut self, now: Instant, local_input: FrameInput) -> Result<TickReport, EngineError> {
        let mut report = self.predict(now, local_input)?;
        let (confirmed, rollbacks) = self.reconcile()?;
        report.confirmed = confirmed;
        report.rollbacks = rollbacks;
        Ok(report)
    }

    /// Prediction phase. The report carries no confirmations.
    pub fn predict(&mut self, now: Instant, local_input: FrameInput) -> Result<TickReport, EngineError> {
        let mut report = TickReport::default();

        while self.window_open() && now >= self.clock.frame_time(self.prediction_frame + 1) {
            let frame = self.prediction_frame + 1;
            let mut local = None;
            if let Some(slot) = self.local_slot {
                let target = frame + self.config.input_delay;
                if target > self.scheduled_through {
                    self.local_inputs.insert(target, local_input);
                    self.scheduled_through = target;
                    report.scheduled.push((target, local_input));
                }
                local = self.scheduled_input(frame).map(|input| (slot, input));
            }
            self.predict_frame(frame, local)?;
            report.predicted.push(frame);
        }

        Ok(report)
    }

    /// Steps the prediction snapshot over `frame`, overriding one seat when a
    /// local input was sampled for it.
    fn predict_frame(
        &mut self,
        frame: FrameIndex,
        local: Option<(usize, FrameInput)>,
    ) -> Result<(), EngineError> {
        let mut data = self.ring.get_or_synthesize(frame)?.into_owned();
        if frame > self.authority_frame {
            if let Some((slot, input)) = local {
                data.set_input(slot, input);
            }
        }

        let next = {
            let current = self
                .pool
                .get(self.prediction_entity)
                .ok_or(EngineError::SnapshotLost("prediction"))?;
            self.sim.step(current, &data)
        };
        let next = self.pool.insert(next);
        let queued = self
            .pool
            .duplicate(next)
            .ok_or(EngineError::SnapshotLost("prediction"))?;

        self.predicted_frames.push_back(data);
        self.predicted_snapshots.push_back(queued);
        self.pool.release(self.prediction_entity);
        self.prediction_entity = next;
        self.prediction_frame = frame;

        self.stats.predicted += 1;
        Ok(())
    }

    /// Reconciliation phase. Returns `(confirmed, rollbacks)`.
    pub fn reconcile(&mut self) -> Result<(usize, usize), EngineError> {
        let mut confirmed = 0;
        let mut rollbacks = 0;

        while confirmed < self.config.max_prediction_frame {
            let frame = self.authority_frame + 1;
            let Some(data) = self.backlog.remove(&frame) else {
                break;
            };

            self.ring.commit(data.clone())?;
            self.authority_frame = frame;
            confirmed += 1;
            self.stats.confirmed += 1;

            match self.predicted_frames.pop_front() {
                Some(predicted) if predicted == data => self.promote()?,
                Some(predicted) => {
                    debug!(
                        "Rollback at frame {} (predicted {:?}, confirmed {:?})",
                        frame,
                        predicted.raw_words(),
                        data.raw_words()
                    );
                    self.rollback(&data)?;
                    rollbacks += 1;
                }
                None => self.advance_unpredicted(&data)?,
            }
        }

        if confirmed > 0 {
            self.local_inputs = self.local_inputs.split_off(&(self.authority_frame + 1));
        }
        Ok((confirmed, rollbacks))
    }

    fn promote(&mut self) -> Result<(), EngineError> {
        let snapshot = self
            .predicted_snapshots
            .pop_front()
            .ok_or(EngineError::SnapshotLost("predicted"))?;
        self.pool.release(self.authority_entity);
        self.authority_entity = snapshot;
        Ok(())
    }

    fn recompute_authority(&mut self, data: &FrameData) -> Result<(), EngineError> {
        let corrected = {
            let prior = self
                .pool
                .get(self.authority_entity)
                .ok_or(EngineError::SnapshotLost("authority"))?;
            self.sim.step(prior, data)
        };
        self.pool.release(self.authority_entity);
        self.authority_entity = self.pool.insert(corrected);
        Ok(())
    }

    fn restart_prediction(&mut self) -> Result<(), EngineError> {
        self.predicted_frames.clear();
        for handle in self.predicted_snapshots.drain(..) {
            self.pool.release(handle);
        }
        self.pool.release(self.prediction_entity);
        self.prediction_entity = self
            .pool
            .duplicate(self.authority_entity)
            .ok_or(EngineError::SnapshotLost("authority"))?;
        self.prediction_frame = self.authority_frame;
        Ok(())
    }

    fn rollback(&mut self, data: &FrameData) -> Result<(), EngineError> {
        self.recompute_authority(data)?;
        self.restart_prediction()?;
        self.stats.rollbacks += 1;

        // Replay confirmed frames that are already here instead of guessing them again.
        let limit = self.authority_frame + self.config.max_prediction_frame as FrameIndex;
        while self.prediction_frame < limit {
            let frame = self.prediction_frame + 1;
            let Some(confirmed) = self.backlog.get(&frame) else {
                break;
            };

            let next = {
                let current = self
                    .pool
                    .get(self.prediction_entity)
                    .ok_or(EngineError::SnapshotLost("prediction"))?;
                self.sim.step(current, confirmed)
            };
            let next = self.pool.insert(next);
            let queued = self
                .pool
                .duplicate(next)
                .ok_or(EngineError::SnapshotLost("prediction"))?;

            self.predicted_frames.push_back(confirmed.clone());
            self.predicted_snapshots.push_back(queued);
            self.pool.release(self.prediction_entity);
            self.prediction_entity = next;
            self.prediction_frame = frame;
            self.stats.replayed += 1;
        }

        Ok(())
    }

    /// Authority overtook prediction: nothing was guessed for this frame.
    fn advance_unpredicted(&mut self, data: &FrameData) -> Result<(), EngineError> {
        self.recompute_authority(data)?;
        self.restart_prediction()
    }
}

impl<S: Simulation> std::fmt::Debug for Predictor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("authority_frame", &self.authority_frame)
            .field("prediction_frame", &self.prediction_frame)
            .field("pending", &self.predicted_frames.len())
            .field("backlog", &self.backlog.len())
            .field("stats", &self.stats)
            .finish()
    }
}
