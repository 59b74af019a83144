//! Wire messages exchanged between clients and the room server
//!
//! Only packed input words travel in gameplay messages; world state never
//! crosses the wire.

use crate::frame::{FrameData, FrameIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SessionId = u32;
pub type RoomId = u32;

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram either side expects to receive.
pub const MAX_PACKET_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Client asks to be matched.
    Ready,
    /// Server: queued, or sent back to the queue after a room dissolved.
    Waiting,
    /// Client withdraws from the queue or its room.
    GiveUp,
    /// Server acknowledges the withdrawal.
    GiveUpSuccess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    // Session
    Connect {
        client_version: u32,
    },
    Connected {
        session_id: SessionId,
    },
    Disconnect,
    /// Keeps an otherwise idle session from timing out.
    Heartbeat,
    Disconnected {
        reason: String,
    },

    // Matchmaking
    RoomMatch {
        status: MatchStatus,
    },
    RoomMatchSuccess {
        room_id: RoomId,
        slot: u8,
        capacity: u8,
    },
    RoomReady {
        room_id: RoomId,
        progress: u8,
    },
    RoomStart {
        room_id: RoomId,
        /// Unix milliseconds at which frame 0 becomes due.
        start_time_ms: u64,
        /// Exact tick length, so rates that do not divide a second survive the trip.
        tick_interval_ns: u64,
        capacity: u8,
        seed: u64,
    },

    // Gameplay
    RoomFrameInput {
        room_id: RoomId,
        client_frame: FrameIndex,
        input: u32,
    },
    RoomFrame {
        room_id: RoomId,
        frame: FrameIndex,
        inputs: Vec<u32>,
    },
    RoomFrameResend {
        room_id: RoomId,
        from_frame: FrameIndex,
    },
}

impl Packet {
    pub fn room_frame(room_id: RoomId, data: &FrameData) -> Self {
        Packet::RoomFrame {
            room_id,
            frame: data.frame,
            inputs: data.raw_words(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("packet of {0} bytes exceeds the datagram limit")]
    TooLarge(usize),
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let bytes = bincode::serialize(packet)?;
    if bytes.len() > MAX_PACKET_SIZE {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode(data: &[u8]) -> Result<Packet, CodecError> {
    Ok(bincode::deserialize(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_frame_packet_roundtrip() {
        let data = FrameData::from_raw(10, &[5, 0]);
        let packet = Packet::room_frame(3, &data);
        let decoded = decode(&encode(&packet).unwrap()).unwrap();

        match decoded {
            Packet::RoomFrame {
                room_id,
                frame,
                inputs,
            } => {
                assert_eq!(room_id, 3);
                assert_eq!(frame, 10);
                assert_eq!(inputs, vec![5, 0]);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_room_start_packet_roundtrip() {
        let packet = Packet::RoomStart {
            room_id: 1,
            start_time_ms: 1_700_000_000_000,
            tick_interval_ns: 50_000_000,
            capacity: 2,
            seed: 99,
        };
        assert_eq!(decode(&encode(&packet).unwrap()).unwrap(), packet);
    }

    #[test]
    fn test_heartbeat_is_tiny() {
        let bytes = encode(&Packet::Heartbeat).unwrap();
        assert!(bytes.len() <= 4);
        assert_eq!(decode(&bytes).unwrap(), Packet::Heartbeat);
    }

    #[test]
    fn test_match_status_roundtrip() {
        for status in [
            MatchStatus::Ready,
            MatchStatus::Waiting,
            MatchStatus::GiveUp,
            MatchStatus::GiveUpSuccess,
        ] {
            let packet = Packet::RoomMatch { status };
            assert_eq!(decode(&encode(&packet).unwrap()).unwrap(), packet);
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_oversized_packet_is_rejected() {
        let packet = Packet::Disconnected {
            reason: "x".repeat(MAX_PACKET_SIZE),
        };
        assert!(matches!(encode(&packet), Err(CodecError::TooLarge(_))));
    }
}
