//! Offline engine: one local authority, no prediction split

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::runner::{
    join_logged, park_until, snapshot_channel, spawn_named, Control, Published, RenderLoop,
    SnapshotReceiver, SnapshotSender,
};
use log::{info, trace};
use shared::{FrameClock, FrameData, FrameIndex, FrameInput, Simulation, NOT_STARTED};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Steps the simulation directly from locally sampled input and records
/// every applied frame so the run can be replayed.
pub struct LocalSimulation<S: Simulation> {
    sim: S,
    clock: FrameClock,
    width: usize,
    local_slot: usize,
    frame: FrameIndex,
    entity: S::Snapshot,
    recorded: Vec<FrameData>,
}

impl<S: Simulation> LocalSimulation<S> {
    pub fn new(
        sim: S,
        initial: S::Snapshot,
        width: usize,
        local_slot: usize,
        clock: FrameClock,
    ) -> Result<Self, EngineError> {
        if local_slot >= width {
            return Err(EngineError::SlotOutOfRange {
                slot: local_slot,
                width,
            });
        }
        Ok(Self {
            sim,
            clock,
            width,
            local_slot,
            frame: NOT_STARTED,
            entity: initial,
            recorded: Vec::new(),
        })
    }

    pub fn frame(&self) -> FrameIndex {
        self.frame
    }

    pub fn snapshot(&self) -> &S::Snapshot {
        &self.entity
    }

    pub fn recorded(&self) -> &[FrameData] {
        &self.recorded
    }

    pub fn into_recording(self) -> Vec<FrameData> {
        self.recorded
    }

    pub fn next_deadline(&self) -> Instant {
        self.clock.frame_time(self.frame + 1)
    }

    pub fn reanchor(&mut self, now: Instant) {
        self.clock.reset(now, self.frame + 1);
    }

    /// Advances one frame per crossed boundary; returns how many were applied.
    pub fn tick(&mut self, now: Instant, input: FrameInput) -> usize {
        let mut advanced = 0;
        while now >= self.clock.frame_time(self.frame + 1) {
            self.frame += 1;
            let mut data = FrameData::empty(self.frame, self.width);
            data.set_input(self.local_slot, input);

            self.entity = self.sim.step(&self.entity, &data);
            self.recorded.push(data);
            advanced += 1;
        }
        if advanced > 1 {
            trace!("Local simulation caught up {} frames", advanced);
        }
        advanced
    }
}

/// Re-derives the final snapshot of a recorded run.
pub fn replay<S: Simulation>(sim: &S, initial: &S::Snapshot, frames: &[FrameData]) -> S::Snapshot {
    shared::sim::run(sim, initial, frames)
}

/// Threaded driver for a [`LocalSimulation`].
pub struct LocalEngine<S: Simulation> {
    sim: S,
    initial: S::Snapshot,
    width: usize,
    local_slot: usize,
    config: EngineConfig,
    control: Arc<Control>,
    snapshots: SnapshotReceiver<S::Snapshot>,
    logic: Option<JoinHandle<Vec<FrameData>>>,
    render: Option<JoinHandle<()>>,
}

fn run_local<S: Simulation>(
    mut local: LocalSimulation<S>,
    control: Arc<Control>,
    snapshots: SnapshotSender<S::Snapshot>,
    config: EngineConfig,
) -> Vec<FrameData> {
    let mut was_paused = false;

    while control.is_running() {
        if control.is_paused() {
            was_paused = true;
            park_until(None, config.idle_wait);
            continue;
        }
        if was_paused {
            was_paused = false;
            local.reanchor(Instant::now());
        }

        if local.tick(Instant::now(), control.input()) > 0 {
            control.publish_frames(local.frame(), local.frame());
            snapshots.send_replace(Some(Published {
                frame: local.frame(),
                snapshot: local.snapshot().clone(),
            }));
        }

        park_until(Some(local.next_deadline()), config.idle_wait);
    }

    local.into_recording()
}

impl<S: Simulation + Clone> LocalEngine<S> {
    pub fn new(
        sim: S,
        initial: S::Snapshot,
        width: usize,
        local_slot: usize,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if local_slot >= width {
            return Err(EngineError::SlotOutOfRange {
                slot: local_slot,
                width,
            });
        }

        let (_, snapshots) = snapshot_channel();
        Ok(Self {
            sim,
            initial,
            width,
            local_slot,
            config,
            control: Control::new(),
            snapshots,
            logic: None,
            render: None,
        })
    }

    /// Starts ticking from frame 0 at the current instant.
    pub fn start(&mut self, render: Option<RenderLoop<S::Snapshot>>) -> Result<(), EngineError> {
        if !self.control.start() {
            return Err(EngineError::AlreadyRunning);
        }

        let clock = FrameClock::new(Instant::now(), 0, self.config.tick_interval);
        let local = LocalSimulation::new(
            self.sim.clone(),
            self.initial.clone(),
            self.width,
            self.local_slot,
            clock,
        )?;

        let (snapshot_tx, snapshot_rx) = snapshot_channel();
        self.snapshots = snapshot_rx.clone();

        let control = self.control.clone();
        let config = self.config.clone();
        match spawn_named("local-logic", move || run_local(local, control, snapshot_tx, config)) {
            Ok(handle) => self.logic = Some(handle),
            Err(e) => {
                self.control.reset();
                return Err(e);
            }
        }

        if let Some(render) = render {
            let control = self.control.clone();
            match spawn_named("render", move || render.run(control, snapshot_rx)) {
                Ok(handle) => self.render = Some(handle),
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            }
        }

        info!("Local engine started ({} seats, slot {})", self.width, self.local_slot);
        Ok(())
    }
}

impl<S: Simulation> LocalEngine<S> {
    /// Stops every loop and returns the frames applied during the run.
    pub fn stop(&mut self) -> Option<Vec<FrameData>> {
        self.control.halt();
        if let Some(logic) = &self.logic {
            logic.thread().unpark();
        }

        let recording = join_logged("local-logic", self.logic.take());
        join_logged("render", self.render.take());
        self.control.reset();

        if let Some(frames) = &recording {
            info!("Local engine stopped after {} frames", frames.len());
        }
        recording
    }

    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    pub fn resume(&self) {
        self.control.set_paused(false);
        if let Some(logic) = &self.logic {
            logic.thread().unpark();
        }
    }

    pub fn set_input(&self, input: FrameInput) {
        self.control.set_input(input);
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn frame(&self) -> FrameIndex {
        self.control.prediction_frame()
    }

    pub fn subscribe(&self) -> SnapshotReceiver<S::Snapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<Published<S::Snapshot>> {
        self.snapshots.borrow().clone()
    }
}

impl<S: Simulation> Drop for LocalEngine<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
