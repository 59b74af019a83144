//! # Lockstep Client Library
//!
//! Client side of the lockstep netcode: predicts ahead of the server using
//! locally sampled input, and rolls back whenever a confirmed frame from
//! the room disagrees with what was guessed.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Frames become due on a wall-clock schedule. For every due frame the
//! client synthesizes an input vector (everyone else's last confirmed
//! input, plus our own live input), steps its prediction snapshot
//! immediately and sends its input upstream. Prediction never runs more
//! than `max_prediction_frame` frames ahead of the last confirmed frame.
//!
//! ### Server Reconciliation
//! Confirmed frames are applied strictly in order. If a confirmed frame
//! equals the prediction made for it, the predicted snapshot is simply
//! promoted. Otherwise authority is recomputed from the previous
//! authoritative snapshot and prediction restarts from there, replaying any
//! confirmed frames that have already arrived.
//!
//! ### Threads
//! Logic, network and render loops run on their own OS threads. Only the
//! logic thread mutates engine state; the others exchange data through
//! channels and atomics.
//!
//! ## Module Organization
//!
//! - `config` - [`EngineConfig`] and its validation
//! - `predictor` - [`Predictor`], the single-threaded prediction/rollback core
//! - `engine` - [`ClientEngine`], the threaded networked engine
//! - `local` - [`LocalSimulation`] and [`LocalEngine`] for offline play and replay
//! - `network` - the [`Transport`] seam, [`UdpTransport`] and the join handshake
//! - `runner` - thread plumbing shared by both engines
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::{join_match, ClientEngine, EngineConfig, MatchSetup, UdpTransport};
//! use shared::{DigestState, FrameInput, InputDigest};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut transport = UdpTransport::connect("127.0.0.1:8080".parse()?, Duration::ZERO)?;
//! let start = join_match(&mut transport, Duration::from_secs(30))?;
//!
//! let setup = MatchSetup {
//!     room_id: start.room_id,
//!     local_slot: Some(start.slot as usize),
//!     width: start.capacity as usize,
//!     start_time: shared::time::instant_from_unix_millis(start.start_time_ms),
//! };
//! let config = EngineConfig::default().with_tick_interval(start.tick_interval);
//! let initial = DigestState::new(setup.width, start.seed);
//!
//! let mut engine = ClientEngine::new(InputDigest, initial, setup, config)?;
//! engine.start(transport, None)?;
//! engine.set_input(FrameInput::new(start.slot, 64, 1));
//! # engine.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod local;
pub mod network;
pub mod predictor;
pub mod runner;

pub use config::{ConfigError, EngineConfig};
pub use engine::{ClientEngine, MatchSetup};
pub use error::EngineError;
pub use local::{replay, LocalEngine, LocalSimulation};
pub use network::{join_match, MatchStart, Transport, TransportError, UdpTransport};
pub use predictor::{Predictor, PredictorStats, TickReport};
pub use runner::{Published, RenderLoop, SnapshotReceiver};
