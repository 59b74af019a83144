//! Matchmaking queue, room registry and message routing
//!
//! The manager is driven from a single task: every inbound room packet goes
//! through [`RoomManager::handle`] and every driver tick through
//! [`RoomManager::tick`]. Replies are queued per session in an outbox that
//! the network layer drains and addresses.

use crate::config::RoomConfig;
use crate::room::{Room, RoomPhase};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::time::unix_millis_at;
use shared::{FrameIndex, MatchStatus, Packet, RoomId, SessionId};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Most frames answered per resend request.
pub const MAX_RESEND_FRAMES: usize = 120;

pub struct RoomManager {
    config: RoomConfig,
    queue: VecDeque<SessionId>,
    rooms: HashMap<RoomId, Room>,
    session_rooms: HashMap<SessionId, RoomId>,
    next_room_id: RoomId,
    rng: StdRng,
    outbox: Vec<(SessionId, Packet)>,
}

impl RoomManager {
    pub fn new(config: RoomConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Manager whose room seeds derive from `seed`.
    pub fn with_seed(config: RoomConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: RoomConfig, rng: StdRng) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            rooms: HashMap::new(),
            session_rooms: HashMap::new(),
            next_room_id: 1,
            rng,
            outbox: Vec::new(),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    pub fn room_of(&self, session_id: SessionId) -> Option<RoomId> {
        self.session_rooms.get(&session_id).copied()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms
            .values()
            .filter(|room| room.phase() == RoomPhase::Active)
            .count()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_queued(&self, session_id: SessionId) -> bool {
        self.queue.contains(&session_id)
    }

    /// Takes every queued outbound packet.
    pub fn drain_outbox(&mut self) -> Vec<(SessionId, Packet)> {
        std::mem::take(&mut self.outbox)
    }

    fn send(&mut self, session_id: SessionId, packet: Packet) {
        self.outbox.push((session_id, packet));
    }

    /// Routes one room-level packet from `session_id`.
    pub fn handle(&mut self, session_id: SessionId, packet: Packet, now: Instant) {
        match packet {
            Packet::RoomMatch {
                status: MatchStatus::Ready,
            } => self.enqueue(session_id),

            Packet::RoomMatch {
                status: MatchStatus::GiveUp,
            } => self.give_up(session_id),

            Packet::RoomReady { room_id, progress } => {
                self.ready(session_id, room_id, progress, now)
            }

            Packet::RoomFrameInput {
                room_id,
                client_frame,
                input,
            } => {
                if let Some(room) = self.member_room_mut(session_id, room_id) {
                    room.submit_input(session_id, client_frame, input);
                }
            }

            Packet::RoomFrameResend {
                room_id,
                from_frame,
            } => self.resend(session_id, room_id, from_frame),

            other => warn!("Session {} sent unexpected {:?}", session_id, other),
        }
    }

    fn member_room_mut(&mut self, session_id: SessionId, room_id: RoomId) -> Option<&mut Room> {
        if self.session_rooms.get(&session_id) != Some(&room_id) {
            debug!("Session {} is not in room {}", session_id, room_id);
            return None;
        }
        self.rooms.get_mut(&room_id)
    }

    fn enqueue(&mut self, session_id: SessionId) {
        if self.session_rooms.contains_key(&session_id) || self.is_queued(session_id) {
            debug!("Session {} already matching", session_id);
            return;
        }

        self.queue.push_back(session_id);
        self.send(
            session_id,
            Packet::RoomMatch {
                status: MatchStatus::Waiting,
            },
        );
        self.form_rooms();
    }

    fn form_rooms(&mut self) {
        while self.queue.len() >= self.config.capacity {
            let sessions: Vec<SessionId> = self.queue.drain(..self.config.capacity).collect();
            let room_id = self.next_room_id;
            self.next_room_id = self.next_room_id.wrapping_add(1).max(1);

            let seed = self.rng.gen::<u64>();
            let room = Room::new(room_id, &sessions, self.config.clone(), seed);
            info!("Room {} created for sessions {:?}", room_id, sessions);

            for player in room.players() {
                self.session_rooms.insert(player.session_id, room_id);
                self.outbox.push((
                    player.session_id,
                    Packet::RoomMatchSuccess {
                        room_id,
                        slot: player.slot as u8,
                        capacity: self.config.capacity as u8,
                    },
                ));
            }
            self.rooms.insert(room_id, room);
        }
    }

    fn give_up(&mut self, session_id: SessionId) {
        if let Some(position) = self.queue.iter().position(|&s| s == session_id) {
            self.queue.remove(position);
        } else if self.session_rooms.contains_key(&session_id) {
            self.leave_room(session_id);
        } else {
            debug!("Session {} gave up without matching", session_id);
        }

        self.send(
            session_id,
            Packet::RoomMatch {
                status: MatchStatus::GiveUpSuccess,
            },
        );
    }

    /// Takes `session_id` out of its room. A waiting room dissolves and the
    /// rest go back to the front of the queue; an active room plays on.
    fn leave_room(&mut self, session_id: SessionId) {
        let Some(room_id) = self.session_rooms.remove(&session_id) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        match room.phase() {
            RoomPhase::Waiting => {
                let remaining: Vec<SessionId> = room
                    .players()
                    .iter()
                    .map(|p| p.session_id)
                    .filter(|&s| s != session_id)
                    .collect();
                self.rooms.remove(&room_id);
                info!("Room {} dissolved before start", room_id);

                for &other in remaining.iter().rev() {
                    self.session_rooms.remove(&other);
                    self.queue.push_front(other);
                }
                for other in remaining {
                    self.send(
                        other,
                        Packet::RoomMatch {
                            status: MatchStatus::Waiting,
                        },
                    );
                }
                self.form_rooms();
            }
            RoomPhase::Active | RoomPhase::Ended => {
                room.set_online(session_id, false);
                info!("Session {} left room {}", session_id, room_id);
            }
        }
    }

    fn ready(&mut self, session_id: SessionId, room_id: RoomId, progress: u8, now: Instant) {
        let countdown = self.config.start_countdown;
        let Some(room) = self.member_room_mut(session_id, room_id) else {
            return;
        };
        if !room.set_progress(session_id, progress) || !room.all_ready() {
            return;
        }

        let start_time = now + countdown;
        room.start(start_time);
        let packet = Packet::RoomStart {
            room_id,
            start_time_ms: unix_millis_at(start_time),
            tick_interval_ns: u64::try_from(room.config().tick_interval.as_nanos())
                .unwrap_or(u64::MAX),
            capacity: room.capacity() as u8,
            seed: room.seed(),
        };
        let sessions: Vec<SessionId> = room.online_sessions().collect();
        info!("Room {} starts in {:?}", room_id, countdown);

        for session in sessions {
            self.send(session, packet.clone());
        }
    }

    fn resend(&mut self, session_id: SessionId, room_id: RoomId, from_frame: FrameIndex) {
        let Some(room) = self.member_room_mut(session_id, room_id) else {
            return;
        };
        let frames = room.resend(from_frame, MAX_RESEND_FRAMES);
        debug!(
            "Resending {} frames from {} to session {}",
            frames.len(),
            from_frame,
            session_id
        );
        for data in &frames {
            self.send(session_id, Packet::room_frame(room_id, data));
        }
    }

    /// The session is gone: drop it from the queue and its room.
    pub fn disconnect(&mut self, session_id: SessionId) {
        if let Some(position) = self.queue.iter().position(|&s| s == session_id) {
            self.queue.remove(position);
        }
        self.leave_room(session_id);
    }

    /// Drives every active room; returns how many frames were committed.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut committed = 0;
        let mut broken = Vec::new();
        let mut outbox = std::mem::take(&mut self.outbox);

        for (&room_id, room) in self.rooms.iter_mut() {
            if room.phase() != RoomPhase::Active {
                continue;
            }

            match room.tick(now) {
                Ok(frames) => {
                    committed += frames.len();
                    for data in &frames {
                        let packet = Packet::room_frame(room_id, data);
                        for session in room.online_sessions() {
                            outbox.push((session, packet.clone()));
                        }
                    }
                }
                Err(e) => {
                    error!("Room {} aborted: {}", room_id, e);
                    for player in room.players() {
                        outbox.push((
                            player.session_id,
                            Packet::Disconnected {
                                reason: e.to_string(),
                            },
                        ));
                    }
                    broken.push(room_id);
                }
            }

            if room.online_count() == 0 {
                room.end();
            }
        }
        self.outbox = outbox;

        let ended: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.phase() == RoomPhase::Ended)
            .map(|(&id, _)| id)
            .chain(broken)
            .collect();
        for room_id in ended {
            if let Some(room) = self.rooms.remove(&room_id) {
                info!(
                    "Room {} ended at frame {}",
                    room_id,
                    room.authority_frame()
                );
                for player in room.players() {
                    if self.session_rooms.get(&player.session_id) == Some(&room_id) {
                        self.session_rooms.remove(&player.session_id);
                    }
                }
            }
        }

        committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager() -> RoomManager {
        let mut config = RoomConfig::from_tick_rate(20);
        config.start_countdown = Duration::from_millis(100);
        config.ring_capacity = 100;
        RoomManager::with_seed(config, 1)
    }

    fn ready(status: MatchStatus) -> Packet {
        Packet::RoomMatch { status }
    }

    fn packets_for(outbox: &[(SessionId, Packet)], session: SessionId) -> Vec<Packet> {
        outbox
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Matches sessions 1 and 2 into a room and starts it; returns the room id and start time.
    fn start_room(manager: &mut RoomManager, now: Instant) -> (RoomId, Instant) {
        manager.handle(1, ready(MatchStatus::Ready), now);
        manager.handle(2, ready(MatchStatus::Ready), now);
        let room_id = manager.room_of(1).unwrap();
        manager.handle(1, Packet::RoomReady { room_id, progress: 100 }, now);
        manager.handle(2, Packet::RoomReady { room_id, progress: 100 }, now);
        manager.drain_outbox();
        (room_id, now + manager.config().start_countdown)
    }

    #[test]
    fn test_queue_until_full() {
        let mut manager = manager();
        let now = Instant::now();

        manager.handle(1, ready(MatchStatus::Ready), now);
        assert_eq!(manager.queue_len(), 1);
        assert_eq!(manager.room_count(), 0);
        assert_eq!(
            manager.drain_outbox(),
            vec![(1, ready(MatchStatus::Waiting))]
        );

        manager.handle(2, ready(MatchStatus::Ready), now);
        assert_eq!(manager.queue_len(), 0);
        assert_eq!(manager.room_count(), 1);

        let room_id = manager.room_of(1).unwrap();
        assert_eq!(manager.room_of(2), Some(room_id));
        let outbox = manager.drain_outbox();
        assert!(packets_for(&outbox, 1).contains(&Packet::RoomMatchSuccess {
            room_id,
            slot: 0,
            capacity: 2
        }));
        assert!(packets_for(&outbox, 2).contains(&Packet::RoomMatchSuccess {
            room_id,
            slot: 1,
            capacity: 2
        }));
    }

    #[test]
    fn test_duplicate_match_request_ignored() {
        let mut manager = manager();
        let now = Instant::now();
        manager.handle(1, ready(MatchStatus::Ready), now);
        manager.handle(1, ready(MatchStatus::Ready), now);
        assert_eq!(manager.queue_len(), 1);
        assert_eq!(manager.room_count(), 0);
    }

    #[test]
    fn test_give_up_while_queued() {
        let mut manager = manager();
        let now = Instant::now();
        manager.handle(1, ready(MatchStatus::Ready), now);
        manager.drain_outbox();

        manager.handle(1, ready(MatchStatus::GiveUp), now);
        assert_eq!(manager.queue_len(), 0);
        assert_eq!(
            manager.drain_outbox(),
            vec![(1, ready(MatchStatus::GiveUpSuccess))]
        );
    }

    #[test]
    fn test_give_up_dissolves_waiting_room() {
        let mut manager = manager();
        let now = Instant::now();
        manager.handle(1, ready(MatchStatus::Ready), now);
        manager.handle(2, ready(MatchStatus::Ready), now);
        manager.drain_outbox();

        manager.handle(1, ready(MatchStatus::GiveUp), now);
        assert_eq!(manager.room_count(), 0);
        assert_eq!(manager.room_of(2), None);
        assert!(manager.is_queued(2));

        let outbox = manager.drain_outbox();
        assert_eq!(packets_for(&outbox, 1), vec![ready(MatchStatus::GiveUpSuccess)]);
        assert_eq!(packets_for(&outbox, 2), vec![ready(MatchStatus::Waiting)]);

        // The re-queued player is matched with the next arrival.
        manager.handle(3, ready(MatchStatus::Ready), now);
        let room_id = manager.room_of(2).unwrap();
        assert_eq!(manager.room(room_id).unwrap().slot_of(2), Some(0));
        assert_eq!(manager.room(room_id).unwrap().slot_of(3), Some(1));
    }

    #[test]
    fn test_room_start_carries_exact_interval() {
        let mut config = RoomConfig::from_tick_rate(30);
        config.start_countdown = Duration::from_millis(100);
        let mut manager = RoomManager::with_seed(config.clone(), 1);
        let now = Instant::now();
        manager.handle(1, ready(MatchStatus::Ready), now);
        manager.handle(2, ready(MatchStatus::Ready), now);
        let room_id = manager.room_of(1).unwrap();
        manager.handle(1, Packet::RoomReady { room_id, progress: 100 }, now);
        manager.handle(2, Packet::RoomReady { room_id, progress: 100 }, now);

        let intervals: Vec<Duration> = manager
            .drain_outbox()
            .into_iter()
            .filter_map(|(_, packet)| match packet {
                Packet::RoomStart { tick_interval_ns, .. } => {
                    Some(Duration::from_nanos(tick_interval_ns))
                }
                _ => None,
            })
            .collect();
        assert_eq!(intervals, vec![config.tick_interval; 2]);
        // A millisecond interval would put frame 300 a full 100ms early.
        assert_eq!(intervals[0] * 300, Duration::from_secs(10) - Duration::from_nanos(100));
    }

    #[test]
    fn test_all_ready_starts_room() {
        let mut manager = manager();
        let now = Instant::now();
        manager.handle(1, ready(MatchStatus::Ready), now);
        manager.handle(2, ready(MatchStatus::Ready), now);
        let room_id = manager.room_of(1).unwrap();
        manager.drain_outbox();

        manager.handle(1, Packet::RoomReady { room_id, progress: 100 }, now);
        assert!(manager.drain_outbox().is_empty());
        assert_eq!(manager.room(room_id).unwrap().phase(), RoomPhase::Waiting);

        manager.handle(2, Packet::RoomReady { room_id, progress: 100 }, now);
        let room = manager.room(room_id).unwrap();
        assert_eq!(room.phase(), RoomPhase::Active);
        assert_eq!(
            room.clock().unwrap().frame_time(0),
            now + Duration::from_millis(100)
        );
        let room_seed = room.seed();

        let outbox = manager.drain_outbox();
        assert_eq!(outbox.len(), 2);
        for (_, packet) in outbox {
            match packet {
                Packet::RoomStart {
                    room_id: started,
                    tick_interval_ns,
                    capacity,
                    seed,
                    ..
                } => {
                    assert_eq!(started, room_id);
                    assert_eq!(tick_interval_ns, 50_000_000);
                    assert_eq!(capacity, 2);
                    assert_eq!(seed, room_seed);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_ready_for_foreign_room_ignored() {
        let mut manager = manager();
        let now = Instant::now();
        manager.handle(1, ready(MatchStatus::Ready), now);
        manager.handle(2, ready(MatchStatus::Ready), now);
        let room_id = manager.room_of(1).unwrap();

        manager.handle(9, Packet::RoomReady { room_id, progress: 100 }, now);
        assert_eq!(manager.room(room_id).unwrap().player(1).unwrap().progress, 0);
    }

    #[test]
    fn test_tick_broadcasts_frames() {
        let mut manager = manager();
        let (room_id, start) = start_room(&mut manager, Instant::now());

        manager.handle(
            1,
            Packet::RoomFrameInput {
                room_id,
                client_frame: 0,
                input: 5,
            },
            start,
        );
        assert_eq!(manager.tick(start), 1);

        let outbox = manager.drain_outbox();
        let expected = Packet::RoomFrame {
            room_id,
            frame: 0,
            inputs: vec![5, 0],
        };
        assert_eq!(packets_for(&outbox, 1), vec![expected.clone()]);
        assert_eq!(packets_for(&outbox, 2), vec![expected]);
    }

    #[test]
    fn test_resend_answers_only_requester() {
        let mut manager = manager();
        let (room_id, start) = start_room(&mut manager, Instant::now());
        manager.tick(start + Duration::from_millis(50) * 4);
        manager.drain_outbox();

        manager.handle(
            2,
            Packet::RoomFrameResend {
                room_id,
                from_frame: 2,
            },
            start,
        );
        let outbox = manager.drain_outbox();
        assert!(packets_for(&outbox, 1).is_empty());
        let frames: Vec<FrameIndex> = packets_for(&outbox, 2)
            .into_iter()
            .filter_map(|p| match p {
                Packet::RoomFrame { frame, .. } => Some(frame),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![2, 3, 4]);
    }

    #[test]
    fn test_offline_player_gets_no_frames() {
        let mut manager = manager();
        let (_, start) = start_room(&mut manager, Instant::now());

        manager.disconnect(2);
        manager.tick(start);
        let outbox = manager.drain_outbox();
        assert_eq!(packets_for(&outbox, 1).len(), 1);
        assert!(packets_for(&outbox, 2).is_empty());
    }

    #[test]
    fn test_room_ends_when_everyone_leaves() {
        let mut manager = manager();
        let (room_id, start) = start_room(&mut manager, Instant::now());

        manager.disconnect(1);
        manager.handle(2, ready(MatchStatus::GiveUp), start);
        manager.tick(start);

        assert!(manager.room(room_id).is_none());
        assert_eq!(manager.room_of(1), None);
        assert_eq!(manager.room_of(2), None);
    }

    #[test]
    fn test_overrun_tears_room_down() {
        let mut manager = manager();
        let (room_id, start) = start_room(&mut manager, Instant::now());

        let committed = manager.tick(start + Duration::from_secs(60));
        assert_eq!(committed, 0);
        assert!(manager.room(room_id).is_none());
        assert_eq!(manager.room_of(1), None);

        let outbox = manager.drain_outbox();
        for session in [1, 2] {
            assert!(matches!(
                packets_for(&outbox, session).as_slice(),
                [Packet::Disconnected { .. }]
            ));
        }
    }

    #[test]
    fn test_input_from_non_member_dropped() {
        let mut manager = manager();
        let (room_id, start) = start_room(&mut manager, Instant::now());

        manager.handle(
            7,
            Packet::RoomFrameInput {
                room_id,
                client_frame: 0,
                input: 9,
            },
            start,
        );
        manager.tick(start);
        let room = manager.room(room_id).unwrap();
        assert_eq!(room.confirmed(0).unwrap().raw_words(), vec![0, 0]);
    }
}
