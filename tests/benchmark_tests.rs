//! Performance benchmarks for the hot paths of the lockstep engine

use client::{EngineConfig, Predictor};
use server::config::RoomConfig;
use server::room::Room;
use shared::protocol::{decode, encode};
use shared::{DigestState, FrameClock, FrameData, FrameInput, FrameRing, InputDigest, Packet};
use std::time::{Duration, Instant};

/// Benchmarks encoding and decoding of broadcast frames
#[test]
fn benchmark_frame_codec() {
    let data = FrameData {
        frame: 1234,
        inputs: (0..8).map(|slot| FrameInput::new(slot, slot * 20, 1)).collect(),
    };
    let packet = Packet::room_frame(1, &data);

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = encode(&packet).unwrap();
        let _ = decode(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Frame codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds for 100k round trips
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks committing to and reading from the frame ring
#[test]
fn benchmark_frame_ring() {
    let mut ring = FrameRing::new(1200, 4);
    let iterations = 100_000i64;
    let start = Instant::now();

    for frame in 0..iterations {
        let mut data = FrameData::empty(frame, 4);
        data.set_input(0, FrameInput::new(0, (frame % 256) as u8, 0));
        ring.commit(data).unwrap();
        let _ = ring.get_or_synthesize(frame + 1).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Frame ring: {} commits in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(ring.authority_frame(), iterations - 1);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks a room committing frames for a full table
#[test]
fn benchmark_room_commit() {
    let tick = Duration::from_millis(50);
    let mut config = RoomConfig::from_tick_rate(20);
    config.capacity = 8;
    config.max_catch_up = 1;
    let sessions: Vec<u32> = (1..=8).collect();
    let mut room = Room::new(1, &sessions, config, 0);

    let t0 = Instant::now();
    room.start(t0);

    let frames = 10_000i64;
    let start = Instant::now();

    for frame in 0..frames {
        for (slot, session) in sessions.iter().enumerate() {
            room.submit_input(*session, frame, FrameInput::new(slot as u8, 1, 0).raw());
        }
        let committed = room.tick(t0 + tick * frame as u32).unwrap();
        assert_eq!(committed.len(), 1);
    }

    let duration = start.elapsed();
    println!(
        "Room commit: {} frames in {:?} ({:.2} μs/frame)",
        frames,
        duration,
        duration.as_micros() as f64 / frames as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks prediction with a rollback on every confirmed frame
#[test]
fn benchmark_predictor_rollbacks() {
    let tick = Duration::from_millis(50);
    let t0 = Instant::now();
    let config = EngineConfig::default()
        .with_tick_interval(tick)
        .with_max_prediction_frame(10);
    let mut predictor = Predictor::new(
        InputDigest,
        DigestState::new(2, 0),
        2,
        Some(0),
        FrameClock::new(t0, 0, tick),
        config,
    )
    .unwrap();

    let frames = 5_000i64;
    let lag = 5;
    let start = Instant::now();

    for step in 0..frames {
        let now = t0 + tick * step as u32;
        predictor.tick(now, FrameInput::new(0, 3, 0)).unwrap();

        // The remote seat changes every frame, so every prediction is wrong.
        let confirmed = step - lag;
        if confirmed >= 0 {
            predictor.receive(FrameData {
                frame: confirmed,
                inputs: vec![
                    FrameInput::new(0, 3, 0),
                    FrameInput::new(1, (confirmed % 256) as u8, 0),
                ],
            });
        }
    }

    let duration = start.elapsed();
    let stats = predictor.stats();
    println!(
        "Predictor: {} frames, {} rollbacks in {:?} ({:.2} μs/frame)",
        frames,
        stats.rollbacks,
        duration,
        duration.as_micros() as f64 / frames as f64
    );

    assert!(stats.rollbacks > 0);
    assert!(duration.as_millis() < 3000);
}
