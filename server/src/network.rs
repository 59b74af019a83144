//! Server network layer handling UDP communications and the room driver loop

use crate::config::ServerConfig;
use crate::room_manager::RoomManager;
use crate::sessions::SessionManager;
use log::{debug, error, info, warn};
use shared::protocol::{decode, encode, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use shared::{Packet, SessionId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    SessionTimeout { session_id: SessionId },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Stops a running [`Server`] from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// Main server coordinating networking, sessions and rooms
pub struct Server {
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<SessionManager>>,
    rooms: RoomManager,
    driver_interval: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        // Rooms run on their own wall clock; the driver only needs to wake often enough.
        let driver_interval = (config.room.tick_interval / 4).max(Duration::from_millis(1));

        Ok(Server {
            socket,
            sessions: Arc::new(RwLock::new(SessionManager::new(
                config.max_sessions,
                config.session_timeout,
            ))),
            rooms: RoomManager::new(config.room),
            driver_interval,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode(&buffer[..len]) {
                        Ok(packet) => {
                            if server_tx
                                .send(ServerMessage::PacketReceived { packet, addr })
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to decode packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(OutboundMessage::SendPacket { packet, addr }) = outbound_rx.recv().await
            {
                let data = match encode(&packet) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to encode packet for {}: {}", addr, e);
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(&data, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that monitors session timeouts
    fn spawn_timeout_checker(&self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut sessions = sessions.write().await;
                    sessions.check_timeouts()
                };

                for session_id in timed_out {
                    if server_tx
                        .send(ServerMessage::SessionTimeout { session_id })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Addresses and queues everything the room manager produced.
    async fn flush_rooms(&mut self) {
        let outbox = self.rooms.drain_outbox();
        if outbox.is_empty() {
            return;
        }

        let sessions = self.sessions.read().await;
        for (session_id, packet) in outbox {
            match sessions.addr_of(session_id) {
                Some(addr) => self.send_packet(packet, addr),
                None => debug!("Dropping packet for departed session {}", session_id),
            }
        }
    }

    /// Handles session-level packets and forwards the rest to the room manager
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Replace any existing session from this address
                let session_id = {
                    let mut sessions = self.sessions.write().await;
                    if let Some(existing) = sessions.find_session_by_addr(addr) {
                        info!("Removing existing session {} from {}", existing, addr);
                        sessions.remove_session(&existing);
                        self.rooms.disconnect(existing);
                    }
                    sessions.add_session(addr)
                };

                let response = match session_id {
                    Some(session_id) => Packet::Connected { session_id },
                    None => Packet::Disconnected {
                        reason: "Server full".to_string(),
                    },
                };
                self.send_packet(response, addr);
            }

            Packet::Disconnect => {
                let session_id = {
                    let mut sessions = self.sessions.write().await;
                    let session_id = sessions.find_session_by_addr(addr);
                    if let Some(session_id) = session_id {
                        sessions.remove_session(&session_id);
                    }
                    session_id
                };

                if let Some(session_id) = session_id {
                    self.rooms.disconnect(session_id);
                }
            }

            Packet::Heartbeat => {
                if self.touch_session(addr).await.is_none() {
                    self.reject_unknown(addr);
                }
            }

            packet => match self.touch_session(addr).await {
                Some(session_id) => self.rooms.handle(session_id, packet, Instant::now()),
                None => self.reject_unknown(addr),
            },
        }
    }

    /// Refreshes the session bound to `addr`, if there is one.
    async fn touch_session(&self, addr: SocketAddr) -> Option<SessionId> {
        let mut sessions = self.sessions.write().await;
        let session_id = sessions.find_session_by_addr(addr);
        if let Some(session_id) = session_id {
            sessions.touch(session_id);
        }
        session_id
    }

    fn reject_unknown(&self, addr: SocketAddr) {
        warn!("Packet from unknown peer {}", addr);
        self.send_packet(
            Packet::Disconnected {
                reason: "Not connected".to_string(),
            },
            addr,
        );
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut driver = interval(self.driver_interval);
        driver.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_report = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::SessionTimeout { session_id }) => {
                            info!("Session {} timed out", session_id);
                            self.rooms.disconnect(session_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = driver.tick() => {
                    self.rooms.tick(Instant::now());

                    if last_report.elapsed() >= Duration::from_secs(10) {
                        last_report = Instant::now();
                        let sessions = self.sessions.read().await;
                        if !sessions.is_empty() {
                            debug!(
                                "{} sessions, {} queued, {} rooms ({} active)",
                                sessions.len(),
                                self.rooms.queue_len(),
                                self.rooms.room_count(),
                                self.rooms.active_rooms()
                            );
                        }
                    }
                },
            }

            self.flush_rooms().await;
        }

        Ok(())
    }
}
