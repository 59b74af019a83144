//! Session bookkeeping for the room server
//!
//! This module tracks which datagram source belongs to which session:
//! - Session lifecycle (connect, disconnect, timeout)
//! - Address lookup for routing replies
//! - Capacity enforcement
//!
//! Match and room state live in the room manager; a session only knows
//! where it is and when it was last heard from.

use log::info;
use shared::SessionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected peer
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier assigned by the server
    pub id: SessionId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
}

impl Session {
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the session has been silent longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Owns every live session and enforces the connection limit.
pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
    next_session_id: SessionId,
    max_sessions: usize,
    timeout: Duration,
}

impl SessionManager {
    /// Session IDs start from 1 and increment for each new connection.
    pub fn new(max_sessions: usize, timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            next_session_id: 1,
            max_sessions,
            timeout,
        }
    }

    /// Returns the new session id, or `None` if the server is full.
    pub fn add_session(&mut self, addr: SocketAddr) -> Option<SessionId> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }

        let session_id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1).max(1);

        info!("Session {} connected from {}", session_id, addr);
        self.sessions.insert(session_id, Session::new(session_id, addr));

        Some(session_id)
    }

    /// Returns true if the session was found and removed.
    pub fn remove_session(&mut self, session_id: &SessionId) -> bool {
        if let Some(session) = self.sessions.remove(session_id) {
            info!("Session {} disconnected", session.id);
            true
        } else {
            false
        }
    }

    pub fn find_session_by_addr(&self, addr: SocketAddr) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, session)| session.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, session_id: SessionId) -> Option<SocketAddr> {
        self.sessions.get(&session_id).map(|session| session.addr)
    }

    /// Marks the session as alive; returns false if it is unknown.
    pub fn touch(&mut self, session_id: SessionId) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Removes and returns every session silent for longer than the timeout.
    pub fn check_timeouts(&mut self) -> Vec<SessionId> {
        let timeout = self.timeout;
        let timed_out: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for session_id in &timed_out {
            self.remove_session(session_id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn manager(max_sessions: usize) -> SessionManager {
        SessionManager::new(max_sessions, Duration::from_secs(5))
    }

    #[test]
    fn test_session_creation() {
        let addr = test_addr();
        let session = Session::new(1, addr);

        assert_eq!(session.id, 1);
        assert_eq!(session.addr, addr);
        assert!(!session.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_session_timeout() {
        let mut session = Session::new(1, test_addr());
        session.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(session.is_timed_out(Duration::from_secs(1)));

        session.touch();
        assert!(!session.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_session() {
        let mut manager = manager(2);
        let session_id = manager.add_session(test_addr()).unwrap();
        assert_eq!(session_id, 1);
        assert_eq!(manager.len(), 1);
        assert!(!manager.is_empty());
    }

    #[test]
    fn test_add_multiple_sessions() {
        let mut manager = manager(3);
        assert_eq!(manager.add_session(test_addr()), Some(1));
        assert_eq!(manager.add_session(test_addr2()), Some(2));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_max_capacity() {
        let mut manager = manager(1);
        assert!(manager.add_session(test_addr()).is_some());
        assert!(manager.add_session(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_session() {
        let mut manager = manager(2);
        let session_id = manager.add_session(test_addr()).unwrap();

        assert!(manager.remove_session(&session_id));
        assert!(manager.is_empty());
        assert!(!manager.remove_session(&session_id));
    }

    #[test]
    fn test_find_by_addr() {
        let mut manager = manager(2);
        let id1 = manager.add_session(test_addr()).unwrap();
        let id2 = manager.add_session(test_addr2()).unwrap();

        assert_eq!(manager.find_session_by_addr(test_addr()), Some(id1));
        assert_eq!(manager.find_session_by_addr(test_addr2()), Some(id2));
        assert_eq!(manager.addr_of(id2), Some(test_addr2()));
        assert_eq!(
            manager.find_session_by_addr("127.0.0.1:9999".parse().unwrap()),
            None
        );
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = SessionManager::new(3, Duration::from_secs(1));
        let id1 = manager.add_session(test_addr()).unwrap();
        let id2 = manager.add_session(test_addr2()).unwrap();

        manager.sessions.get_mut(&id1).unwrap().last_seen =
            Instant::now() - Duration::from_secs(2);

        let timed_out = manager.check_timeouts();
        assert_eq!(timed_out, vec![id1]);
        assert_eq!(manager.len(), 1);
        assert!(manager.touch(id2));
        assert!(!manager.touch(id1));
    }
}
