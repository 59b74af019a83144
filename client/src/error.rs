use crate::config::ConfigError;
use crate::network::TransportError;
use shared::RingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("frame ring fault: {0}")]
    Ring(#[from] RingError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{0} snapshot is no longer live")]
    SnapshotLost(&'static str),

    #[error("local slot {slot} is outside a {width}-seat match")]
    SlotOutOfRange { slot: usize, width: usize },

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}
