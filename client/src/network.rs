use log::{debug, info, warn};
use shared::protocol::{decode, encode, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use shared::{
    CodecError, MatchStatus, Packet, RoomId, SessionId, KEEPALIVE_INTERVAL, READY_PROGRESS,
};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("transport closed")]
    Closed,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("server disconnected us: {0}")]
    Rejected(String),
}

/// Packet-level link to the room server, used from a single thread.
pub trait Transport: Send + 'static {
    fn send(&mut self, packet: &Packet) -> Result<(), TransportError>;

    /// Waits up to `timeout` for the next packet.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        (**self).send(packet)
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>, TransportError> {
        (**self).recv_timeout(timeout)
    }
}

/// Blocking UDP transport with optional simulated latency.
pub struct UdpTransport {
    socket: UdpSocket,
    server_addr: SocketAddr,
    fake_ping: Duration,
    buffer: Vec<u8>,
}

impl UdpTransport {
    pub fn connect(server_addr: SocketAddr, fake_ping: Duration) -> Result<Self, TransportError> {
        let bind: SocketAddr = if server_addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(server_addr)?;
        debug!("Bound {} for {}", socket.local_addr()?, server_addr);

        Ok(Self {
            socket,
            server_addr,
            fake_ping,
            buffer: vec![0; MAX_PACKET_SIZE],
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    fn delay(&self) {
        if !self.fake_ping.is_zero() {
            thread::sleep(self.fake_ping / 2);
        }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.delay();
        let data = encode(packet)?;
        self.socket.send(&data)?;
        Ok(())
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>, TransportError> {
        // A zero read timeout means "block forever" to the OS.
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        match self.socket.recv(&mut self.buffer) {
            Ok(len) => {
                self.delay();
                match decode(&self.buffer[..len]) {
                    Ok(packet) => Ok(Some(packet)),
                    Err(e) => {
                        warn!("Dropping undecodable datagram ({} bytes): {}", len, e);
                        Ok(None)
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Everything a client learns between connecting and frame 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchStart {
    pub session_id: SessionId,
    pub room_id: RoomId,
    pub slot: u8,
    pub capacity: u8,
    /// Unix milliseconds at which frame 0 is due.
    pub start_time_ms: u64,
    pub tick_interval: Duration,
    pub seed: u64,
    /// Round trip of the connect exchange.
    pub rtt: Duration,
}

/// Waits for a packet `accept` takes. With `keepalive` set, a heartbeat goes
/// out whenever the wait has been silent that long.
fn wait_for<T>(
    transport: &mut impl Transport,
    deadline: Instant,
    what: &'static str,
    keepalive: Option<Duration>,
    mut accept: impl FnMut(Packet) -> Option<T>,
) -> Result<T, TransportError> {
    let mut last_sent = Instant::now();
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(TransportError::Timeout(what));
        }
        let mut wait = deadline - now;
        if let Some(keepalive) = keepalive {
            let idle = now.duration_since(last_sent);
            if idle >= keepalive {
                transport.send(&Packet::Heartbeat)?;
                last_sent = now;
                wait = wait.min(keepalive);
            } else {
                wait = wait.min(keepalive - idle);
            }
        }
        let Some(packet) = transport.recv_timeout(wait)? else {
            continue;
        };
        if let Packet::Disconnected { reason } = packet {
            return Err(TransportError::Rejected(reason));
        }
        if let Some(value) = accept(packet) {
            return Ok(value);
        }
    }
}

/// Runs connect, matchmaking and the ready handshake, returning once the
/// server announces the room start.
pub fn join_match(
    transport: &mut impl Transport,
    timeout: Duration,
) -> Result<MatchStart, TransportError> {
    let deadline = Instant::now() + timeout;

    let connect_sent = Instant::now();
    transport.send(&Packet::Connect {
        client_version: PROTOCOL_VERSION,
    })?;
    // The server rejects heartbeats until it has handed out a session.
    let session_id = wait_for(transport, deadline, "session", None, |packet| match packet {
        Packet::Connected { session_id } => Some(session_id),
        _ => None,
    })?;
    let rtt = connect_sent.elapsed();
    info!("Connected! Session ID: {} (rtt {:?})", session_id, rtt);

    let keepalive = Some(KEEPALIVE_INTERVAL);
    transport.send(&Packet::RoomMatch {
        status: MatchStatus::Ready,
    })?;
    let (room_id, slot, capacity) = wait_for(transport, deadline, "room match", keepalive, |packet| match packet {
        Packet::RoomMatchSuccess {
            room_id,
            slot,
            capacity,
        } => Some((room_id, slot, capacity)),
        Packet::RoomMatch {
            status: MatchStatus::Waiting,
        } => {
            debug!("Queued for matchmaking");
            None
        }
        _ => None,
    })?;
    info!("Matched into room {} as slot {}/{}", room_id, slot, capacity);

    transport.send(&Packet::RoomReady {
        room_id,
        progress: READY_PROGRESS,
    })?;
    let start = wait_for(transport, deadline, "room start", keepalive, |packet| match packet {
        Packet::RoomStart {
            room_id: started,
            start_time_ms,
            tick_interval_ns,
            capacity,
            seed,
        } if started == room_id => Some(MatchStart {
            session_id,
            room_id,
            slot,
            capacity,
            start_time_ms,
            tick_interval: Duration::from_nanos(tick_interval_ns),
            seed,
            rtt,
        }),
        _ => None,
    })?;
    info!(
        "Room {} starts at {} ({:?} ticks)",
        room_id,
        start.start_time_ms,
        start.tick_interval
    );

    Ok(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replies to each sent packet with a scripted response.
    struct Scripted {
        sent: Vec<Packet>,
        replies: VecDeque<Packet>,
        inbox: VecDeque<Packet>,
    }

    impl Scripted {
        fn new(replies: Vec<Packet>) -> Self {
            Self {
                sent: Vec::new(),
                replies: replies.into(),
                inbox: VecDeque::new(),
            }
        }
    }

    impl Transport for Scripted {
        fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
            self.sent.push(packet.clone());
            if *packet == Packet::Heartbeat {
                return Ok(());
            }
            if let Some(reply) = self.replies.pop_front() {
                self.inbox.push_back(reply);
            }
            Ok(())
        }

        fn recv_timeout(&mut self, _timeout: Duration) -> Result<Option<Packet>, TransportError> {
            Ok(self.inbox.pop_front())
        }
    }

    #[test]
    fn test_join_match_handshake() {
        let mut transport = Scripted::new(vec![
            Packet::Connected { session_id: 7 },
            Packet::RoomMatchSuccess {
                room_id: 3,
                slot: 1,
                capacity: 2,
            },
            Packet::RoomStart {
                room_id: 3,
                start_time_ms: 1_000,
                tick_interval_ns: 33_333_333,
                capacity: 2,
                seed: 99,
            },
        ]);

        let start = join_match(&mut transport, Duration::from_secs(1)).unwrap();
        assert!(start.rtt < Duration::from_secs(1));
        assert_eq!(
            start,
            MatchStart {
                session_id: 7,
                room_id: 3,
                slot: 1,
                capacity: 2,
                start_time_ms: 1_000,
                tick_interval: Duration::from_nanos(33_333_333),
                seed: 99,
                rtt: start.rtt,
            }
        );
        assert_eq!(
            transport.sent[2],
            Packet::RoomReady {
                room_id: 3,
                progress: READY_PROGRESS
            }
        );
    }

    #[test]
    fn test_join_match_rejected() {
        let mut transport = Scripted::new(vec![Packet::Disconnected {
            reason: "full".to_string(),
        }]);
        let result = join_match(&mut transport, Duration::from_secs(1));
        assert!(matches!(result, Err(TransportError::Rejected(reason)) if reason == "full"));
    }

    #[test]
    fn test_join_match_times_out() {
        let mut transport = Scripted::new(vec![]);
        let result = join_match(&mut transport, Duration::from_millis(20));
        assert!(matches!(result, Err(TransportError::Timeout("session"))));
    }

    #[test]
    fn test_join_match_heartbeats_while_queued() {
        let mut transport = Scripted::new(vec![
            Packet::Connected { session_id: 7 },
            Packet::RoomMatch {
                status: MatchStatus::Waiting,
            },
        ]);
        let timeout = KEEPALIVE_INTERVAL * 2 + Duration::from_millis(200);
        let result = join_match(&mut transport, timeout);
        assert!(matches!(result, Err(TransportError::Timeout("room match"))));

        let heartbeats = transport
            .sent
            .iter()
            .filter(|p| **p == Packet::Heartbeat)
            .count();
        assert_eq!(heartbeats, 2);
        // Nothing is sent before the session exists.
        assert!(matches!(transport.sent[0], Packet::Connect { .. }));
        assert!(matches!(transport.sent[1], Packet::RoomMatch { .. }));
    }

    #[test]
    fn test_udp_transport_roundtrip() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut transport =
            UdpTransport::connect(server.local_addr().unwrap(), Duration::ZERO).unwrap();

        transport.send(&Packet::Disconnect).unwrap();
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let (len, from) = server.recv_from(&mut buffer).unwrap();
        assert_eq!(decode(&buffer[..len]).unwrap(), Packet::Disconnect);

        let reply = encode(&Packet::Connected { session_id: 1 }).unwrap();
        server.send_to(&reply, from).unwrap();
        let packet = transport.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(packet, Some(Packet::Connected { session_id: 1 }));

        assert_eq!(transport.recv_timeout(Duration::from_millis(10)).unwrap(), None);
    }
}
