//! Threaded client engine
//!
//! Three threads cooperate without locks:
//!
//! - **logic** owns the [`Predictor`] and is the only writer of engine state.
//!   It sleeps until the next frame is due or until the network thread
//!   unparks it.
//! - **network** owns the [`Transport`]. Confirmed frames go to the logic
//!   thread through an unbounded channel; outbound packets come back the
//!   other way. A heartbeat goes out whenever the link has been quiet for
//!   the keepalive interval.
//! - **render** (optional) reads the latest predicted snapshot from a
//!   `watch` channel at its own cadence.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::network::{Transport, TransportError};
use crate::predictor::Predictor;
use crate::runner::{
    join_logged, park_until, snapshot_channel, spawn_named, Control, Published, RenderLoop,
    SnapshotReceiver, SnapshotSender,
};
use log::{debug, error, info, warn};
use shared::{FrameClock, FrameData, FrameIndex, FrameInput, Packet, RoomId, Simulation};
use std::sync::Arc;
use std::thread::{JoinHandle, Thread};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Match parameters handed out by the server before frame 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSetup {
    pub room_id: RoomId,
    /// Our seat, or `None` for a spectator.
    pub local_slot: Option<usize>,
    pub width: usize,
    /// When frame 0 is due.
    pub start_time: Instant,
}

/// Tracks a hole in the confirmed stream and decides when to ask for a resend.
#[derive(Debug, Default)]
struct GapTracker {
    pending: Option<(FrameIndex, Instant)>,
}

impl GapTracker {
    /// Returns the frame to request, if a request is due.
    fn poll(&mut self, missing: Option<FrameIndex>, now: Instant, after: Duration) -> Option<FrameIndex> {
        let Some(frame) = missing else {
            self.pending = None;
            return None;
        };

        match self.pending {
            Some((seen, since)) if seen == frame => {
                if now.duration_since(since) >= after {
                    self.pending = Some((frame, now));
                    Some(frame)
                } else {
                    None
                }
            }
            _ => {
                self.pending = Some((frame, now));
                None
            }
        }
    }
}

struct LogicLoop<S: Simulation> {
    predictor: Predictor<S>,
    room_id: RoomId,
    control: Arc<Control>,
    inbound: UnboundedReceiver<FrameData>,
    outbound: UnboundedSender<Packet>,
    snapshots: SnapshotSender<S::Snapshot>,
    gaps: GapTracker,
}

impl<S: Simulation> LogicLoop<S> {
    fn run(mut self) {
        let config = self.predictor.config().clone();
        let mut was_paused = false;

        while self.control.is_running() {
            if self.control.is_paused() {
                was_paused = true;
                park_until(None, config.idle_wait);
                continue;
            }
            if was_paused {
                was_paused = false;
                self.predictor.reanchor(Instant::now());
                debug!(
                    "Resumed, frame {} re-anchored to now",
                    self.predictor.prediction_frame() + 1
                );
            }

            if let Err(e) = self.step(&config) {
                error!("Client engine fault in room {}: {}", self.room_id, e);
                self.control.halt();
                break;
            }

            park_until(self.predictor.next_deadline(), config.idle_wait);
        }
    }

    fn step(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        while let Ok(data) = self.inbound.try_recv() {
            self.predictor.receive(data);
        }

        let now = Instant::now();
        let report = self.predictor.tick(now, self.control.input())?;

        for (frame, input) in &report.scheduled {
            self.send(Packet::RoomFrameInput {
                room_id: self.room_id,
                client_frame: *frame,
                input: input.raw(),
            });
        }
        if report.rollbacks > 0 {
            self.control.add_rollbacks(report.rollbacks);
        }

        if let Some(from_frame) = self
            .gaps
            .poll(self.predictor.missing_frame(), now, config.resend_after)
        {
            debug!("Requesting resend from frame {}", from_frame);
            self.control.add_resend();
            self.send(Packet::RoomFrameResend {
                room_id: self.room_id,
                from_frame,
            });
        }

        self.control.publish_frames(
            self.predictor.authority_frame(),
            self.predictor.prediction_frame(),
        );
        if !report.predicted.is_empty() || report.confirmed > 0 {
            if let Some(snapshot) = self.predictor.prediction_snapshot() {
                self.snapshots.send_replace(Some(Published {
                    frame: self.predictor.prediction_frame(),
                    snapshot: snapshot.clone(),
                }));
            }
        }

        Ok(())
    }

    fn send(&self, packet: Packet) {
        if self.outbound.send(packet).is_err() {
            debug!("Network thread gone, dropping outbound packet");
        }
    }
}

struct NetworkLoop<T: Transport> {
    transport: T,
    room_id: RoomId,
    width: usize,
    poll: Duration,
    keepalive: Duration,
    last_sent: Instant,
    control: Arc<Control>,
    inbound: UnboundedSender<FrameData>,
    outbound: UnboundedReceiver<Packet>,
    logic: Thread,
}

impl<T: Transport> NetworkLoop<T> {
    fn run(mut self) {
        while self.control.is_running() {
            if let Err(e) = self.flush() {
                error!("Send failed: {}", e);
            }
            if self.last_sent.elapsed() >= self.keepalive {
                if let Err(e) = self.send(&Packet::Heartbeat) {
                    error!("Heartbeat failed: {}", e);
                }
            }

            match self.transport.recv_timeout(self.poll) {
                Ok(Some(packet)) => self.handle(packet),
                Ok(None) => {}
                Err(e) => {
                    error!("Receive failed: {}", e);
                    self.control.halt();
                }
            }
        }

        self.logic.unpark();
        if let Err(e) = self.flush() {
            debug!("Dropped queued packets on shutdown: {}", e);
        }
        if let Err(e) = self.send(&Packet::Disconnect) {
            debug!("Disconnect not delivered: {}", e);
        }
    }

    fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.transport.send(packet)?;
        self.last_sent = Instant::now();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        while let Ok(packet) = self.outbound.try_recv() {
            self.send(&packet)?;
        }
        Ok(())
    }

    fn handle(&mut self, packet: Packet) {
        match packet {
            Packet::RoomFrame {
                room_id,
                frame,
                inputs,
            } if room_id == self.room_id => {
                if inputs.len() != self.width {
                    warn!(
                        "Frame {} carries {} inputs, expected {}",
                        frame,
                        inputs.len(),
                        self.width
                    );
                    return;
                }
                if self.inbound.send(FrameData::from_raw(frame, &inputs)).is_ok() {
                    self.logic.unpark();
                }
            }
            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.control.halt();
            }
            other => debug!("Ignoring {:?}", other),
        }
    }
}

/// Prediction and rollback client for one match.
pub struct ClientEngine<S: Simulation> {
    sim: S,
    initial: S::Snapshot,
    setup: MatchSetup,
    config: EngineConfig,
    control: Arc<Control>,
    snapshots: SnapshotReceiver<S::Snapshot>,
    logic: Option<JoinHandle<()>>,
    network: Option<JoinHandle<()>>,
    render: Option<JoinHandle<()>>,
}

impl<S: Simulation + Clone> ClientEngine<S> {
    pub fn new(
        sim: S,
        initial: S::Snapshot,
        setup: MatchSetup,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if let Some(slot) = setup.local_slot {
            if slot >= setup.width {
                return Err(EngineError::SlotOutOfRange {
                    slot,
                    width: setup.width,
                });
            }
        }

        let (_, snapshots) = snapshot_channel();
        Ok(Self {
            sim,
            initial,
            setup,
            config,
            control: Control::new(),
            snapshots,
            logic: None,
            network: None,
            render: None,
        })
    }

    /// Spawns the logic and network threads, plus a render thread if given.
    /// Every start begins from frame `-1` with fresh state.
    pub fn start<T: Transport>(
        &mut self,
        transport: T,
        render: Option<RenderLoop<S::Snapshot>>,
    ) -> Result<(), EngineError> {
        if !self.control.start() {
            return Err(EngineError::AlreadyRunning);
        }

        match self.spawn(transport, render) {
            Ok(()) => {
                info!(
                    "Client engine started for room {} (slot {:?}, {} seats)",
                    self.setup.room_id, self.setup.local_slot, self.setup.width
                );
                Ok(())
            }
            Err(e) => {
                self.stop();
                Err(e)
            }
        }
    }

    fn spawn<T: Transport>(
        &mut self,
        transport: T,
        render: Option<RenderLoop<S::Snapshot>>,
    ) -> Result<(), EngineError> {
        let clock = FrameClock::new(self.setup.start_time, 0, self.config.tick_interval);
        let predictor = Predictor::new(
            self.sim.clone(),
            self.initial.clone(),
            self.setup.width,
            self.setup.local_slot,
            clock,
            self.config.clone(),
        )?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = snapshot_channel();
        self.snapshots = snapshot_rx.clone();

        let logic = LogicLoop {
            predictor,
            room_id: self.setup.room_id,
            control: self.control.clone(),
            inbound: inbound_rx,
            outbound: outbound_tx,
            snapshots: snapshot_tx,
            gaps: GapTracker::default(),
        };
        let logic = spawn_named("logic", move || logic.run())?;
        let logic_thread = logic.thread().clone();
        self.logic = Some(logic);

        let network = NetworkLoop {
            transport,
            room_id: self.setup.room_id,
            width: self.setup.width,
            poll: self.config.network_poll,
            keepalive: self.config.keepalive,
            last_sent: Instant::now(),
            control: self.control.clone(),
            inbound: inbound_tx,
            outbound: outbound_rx,
            logic: logic_thread,
        };
        self.network = Some(spawn_named("network", move || network.run())?);

        if let Some(render) = render {
            let control = self.control.clone();
            self.render = Some(spawn_named("render", move || render.run(control, snapshot_rx))?);
        }

        Ok(())
    }
}

impl<S: Simulation> ClientEngine<S> {
    /// Signals every loop to exit, joins them and resets the counters.
    /// Join failures are logged, never propagated.
    pub fn stop(&mut self) {
        let was_running = self.control.is_running();
        self.control.halt();
        if let Some(logic) = &self.logic {
            logic.thread().unpark();
        }

        join_logged("network", self.network.take());
        join_logged("logic", self.logic.take());
        join_logged("render", self.render.take());

        self.control.reset();
        if was_running {
            info!("Client engine stopped for room {}", self.setup.room_id);
        }
    }

    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    /// Resumes ticking. The clock is re-anchored so paused time is not caught up.
    pub fn resume(&self) {
        self.control.set_paused(false);
        if let Some(logic) = &self.logic {
            logic.thread().unpark();
        }
    }

    /// Sets the input word used for every frame predicted from now on.
    pub fn set_input(&self, input: FrameInput) {
        self.control.set_input(input);
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn authority_frame(&self) -> FrameIndex {
        self.control.authority_frame()
    }

    pub fn prediction_frame(&self) -> FrameIndex {
        self.control.prediction_frame()
    }

    pub fn rollbacks(&self) -> u64 {
        self.control.rollbacks()
    }

    pub fn resend_requests(&self) -> u64 {
        self.control.resends()
    }

    pub fn setup(&self) -> &MatchSetup {
        &self.setup
    }

    /// Receiver for predicted snapshots as they are published.
    pub fn subscribe(&self) -> SnapshotReceiver<S::Snapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<Published<S::Snapshot>> {
        self.snapshots.borrow().clone()
    }
}

impl<S: Simulation> Drop for ClientEngine<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
