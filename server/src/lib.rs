//! # Lockstep Room Server Library
//!
//! This library provides the relay server for the lockstep netcode engine. The
//! server never simulates anything: it collects each player's input for a frame,
//! fills the gaps, and broadcasts the completed frame to everyone in the room.
//! Clients run the simulation themselves and converge because they all consume
//! the same confirmed input stream.
//!
//! ## Core Responsibilities
//!
//! ### Matchmaking
//! Sessions that ask for a match wait in a FIFO queue. As soon as enough of them
//! are queued to fill a room, a room is formed and each member is told its slot.
//!
//! ### Room Clock
//! Once every member reports full readiness, the room picks a start time a short
//! countdown in the future. From then on frames become due on a fixed wall-clock
//! schedule, independent of when inputs arrive.
//!
//! ### Frame Authority
//! When a frame is due, the room commits it:
//! - Inputs that arrived for that frame are used as-is
//! - Missing inputs repeat the slot's previous input
//! - The committed frame is stored for resend requests and broadcast
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Tick rate, room capacity, countdown and buffering limits.
//!
//! ### Sessions Module (`sessions`)
//! Address-to-session bookkeeping and timeout detection.
//!
//! ### Room Module (`room`)
//! A single room: players, readiness, input history and the confirmed frame ring.
//!
//! ### Room Manager Module (`room_manager`)
//! The matchmaking queue and the registry of live rooms. Routes room packets and
//! drives every room's clock.
//!
//! ### Network Module (`network`)
//! UDP socket handling and the main event loop tying the other modules together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::{RoomConfig, ServerConfig};
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Two-player rooms ticking at 20Hz
//!     let config = ServerConfig::new("127.0.0.1:8080".parse()?, RoomConfig::from_tick_rate(20));
//!     let mut server = Server::new(config).await?;
//!
//!     // Runs until shut down:
//!     // - Accepts sessions and answers matchmaking requests
//!     // - Starts rooms once every member is ready
//!     // - Commits and broadcasts frames on each room's schedule
//!     // - Drops sessions that go silent
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The server runs a single event loop fed by internal async tasks:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Encodes and sends the outgoing packet queue
//! - **Timeout Checker**: Removes sessions that stopped sending
//! - **Room Driver**: Wakes several times per tick to commit due frames

pub mod config;
pub mod network;
pub mod room;
pub mod room_manager;
pub mod sessions;

pub use config::{ConfigError, RoomConfig, ServerConfig};
pub use network::Server;
pub use room::{Room, RoomError, RoomPhase};
pub use room_manager::RoomManager;
pub use sessions::SessionManager;
