//! Thread plumbing shared by the networked and local engines

use crate::error::EngineError;
use log::{debug, warn};
use shared::{FrameIndex, FrameInput, NOT_STARTED};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Cross-thread view of an engine. The logic thread is the only writer of
/// the frame mirrors; the owning handle writes the flags and the input word.
#[derive(Debug)]
pub(crate) struct Control {
    running: AtomicBool,
    paused: AtomicBool,
    input: AtomicU32,
    authority_frame: AtomicI64,
    prediction_frame: AtomicI64,
    rollbacks: AtomicU64,
    resends: AtomicU64,
}

impl Control {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            input: AtomicU32::new(0),
            authority_frame: AtomicI64::new(NOT_STARTED),
            prediction_frame: AtomicI64::new(NOT_STARTED),
            rollbacks: AtomicU64::new(0),
            resends: AtomicU64::new(0),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns false if it was already running.
    pub fn start(&self) -> bool {
        !self.running.swap(true, Ordering::AcqRel)
    }

    pub fn halt(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn input(&self) -> FrameInput {
        FrameInput::from_raw(self.input.load(Ordering::Relaxed))
    }

    pub fn set_input(&self, input: FrameInput) {
        self.input.store(input.raw(), Ordering::Relaxed);
    }

    pub fn authority_frame(&self) -> FrameIndex {
        self.authority_frame.load(Ordering::Acquire)
    }

    pub fn prediction_frame(&self) -> FrameIndex {
        self.prediction_frame.load(Ordering::Acquire)
    }

    pub fn publish_frames(&self, authority: FrameIndex, prediction: FrameIndex) {
        self.authority_frame.store(authority, Ordering::Release);
        self.prediction_frame.store(prediction, Ordering::Release);
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn add_rollbacks(&self, count: usize) {
        self.rollbacks.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn resends(&self) -> u64 {
        self.resends.load(Ordering::Relaxed)
    }

    pub fn add_resend(&self) {
        self.resends.fetch_add(1, Ordering::Relaxed);
    }

    /// Back to the freshly constructed state; only called with every thread joined.
    pub fn reset(&self) {
        self.running.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.input.store(0, Ordering::Relaxed);
        self.publish_frames(NOT_STARTED, NOT_STARTED);
        self.rollbacks.store(0, Ordering::Relaxed);
        self.resends.store(0, Ordering::Relaxed);
    }
}

/// Latest predicted state handed to the render loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Published<T> {
    pub frame: FrameIndex,
    pub snapshot: T,
}

pub type SnapshotSender<T> = watch::Sender<Option<Published<T>>>;
pub type SnapshotReceiver<T> = watch::Receiver<Option<Published<T>>>;

pub fn snapshot_channel<T>() -> (SnapshotSender<T>, SnapshotReceiver<T>) {
    watch::channel(None)
}

/// Read-only consumer of published snapshots, run on its own thread.
pub struct RenderLoop<T> {
    interval: Duration,
    hook: Box<dyn FnMut(&Published<T>) + Send>,
}

impl<T> RenderLoop<T> {
    pub fn new(interval: Duration, hook: impl FnMut(&Published<T>) + Send + 'static) -> Self {
        Self {
            interval,
            hook: Box::new(hook),
        }
    }
}

impl<T: Clone> RenderLoop<T> {
    pub(crate) fn run(mut self, control: Arc<Control>, mut snapshots: SnapshotReceiver<T>) {
        while control.is_running() {
            thread::sleep(self.interval);
            match snapshots.has_changed() {
                Ok(true) => {
                    // The borrow holds the channel lock; release it before the hook runs.
                    let latest = snapshots.borrow_and_update().clone();
                    if let Some(published) = latest {
                        (self.hook)(&published);
                    }
                }
                Ok(false) => {}
                // Logic thread is gone.
                Err(_) => break,
            }
        }
    }
}

pub(crate) fn spawn_named<F, T>(name: &'static str, body: F) -> Result<JoinHandle<T>, EngineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|source| EngineError::Spawn { name, source })
}

/// Joins `handle`, logging instead of propagating a panicked thread.
pub(crate) fn join_logged<T>(name: &str, handle: Option<JoinHandle<T>>) -> Option<T> {
    match handle?.join() {
        Ok(value) => {
            debug!("{} thread stopped", name);
            Some(value)
        }
        Err(_) => {
            warn!("{} thread panicked during shutdown", name);
            None
        }
    }
}

/// Parks until `deadline` or for at most `idle`; unparking cuts the wait short.
pub(crate) fn park_until(deadline: Option<Instant>, idle: Duration) {
    let wait = match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(idle),
        None => idle,
    };
    if !wait.is_zero() {
        thread::park_timeout(wait);
    }
}
