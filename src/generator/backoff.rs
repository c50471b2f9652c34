use std::time::Duration;

/// Delay before the next attempt after `consecutive_failures` failures in a
/// row: `2^k` seconds, capped at `ceiling`.
pub fn backoff_delay(consecutive_failures: u32, ceiling: Duration) -> Duration {
    let secs = 1u64.checked_shl(consecutive_failures).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CEILING: Duration = Duration::from_secs(60);

    #[test]
    fn doubles_per_failure() {
        assert_eq!(backoff_delay(1, CEILING), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, CEILING), Duration::from_secs(4));
        assert_eq!(backoff_delay(5, CEILING), Duration::from_secs(32));
    }

    #[test]
    fn caps_at_ceiling() {
        assert_eq!(backoff_delay(6, CEILING), CEILING);
        assert_eq!(backoff_delay(40, CEILING), CEILING);
        assert_eq!(backoff_delay(u32::MAX, CEILING), CEILING);
    }
}
