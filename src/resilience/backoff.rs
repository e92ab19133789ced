//! Reconnection delay with jitter.

use rand::Rng;
use std::time::Duration;

/// Fixed reconnection delay plus a random extra of up to `jitter`.
///
/// A zero jitter gives exactly `base`, which keeps reconnect timing
/// predictable for a single ship.
pub fn reconnect_delay(base: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_jitter_is_exact() {
        let delay = reconnect_delay(Duration::from_millis(1000), Duration::ZERO);
        assert_eq!(delay, Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..100 {
            let delay = reconnect_delay(Duration::from_millis(100), Duration::from_millis(50));
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
