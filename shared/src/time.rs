//! Conversions between wire timestamps and monotonic instants

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Wire timestamp for a local instant, measured against the current wall clock.
pub fn unix_millis_at(instant: Instant) -> u64 {
    let now = Instant::now();
    let wall = unix_millis();
    if instant >= now {
        wall.saturating_add(instant.duration_since(now).as_millis() as u64)
    } else {
        wall.saturating_sub(now.duration_since(instant).as_millis() as u64)
    }
}

/// Local instant for a wire timestamp.
pub fn instant_from_unix_millis(millis: u64) -> Instant {
    let now = Instant::now();
    let wall = unix_millis();
    if millis >= wall {
        now + Duration::from_millis(millis - wall)
    } else {
        now.checked_sub(Duration::from_millis(wall - millis))
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_future_timestamp_round_trip() {
        let target = Instant::now() + Duration::from_secs(3);
        let wire = unix_millis_at(target);
        let back = instant_from_unix_millis(wire);

        let drift = if back > target {
            back - target
        } else {
            target - back
        };
        assert!(drift < Duration::from_millis(50));
    }

    #[test]
    fn test_past_timestamp() {
        let wire = unix_millis() - 1_000;
        let instant = instant_from_unix_millis(wire);
        assert!(instant <= Instant::now());
    }
}
