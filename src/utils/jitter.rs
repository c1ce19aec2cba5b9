//! Random jitter added to restart and creation backoff delays

use rand::{Rng, rng};

/// Uniform jitter between 0 and `max_jitter_ms` (inclusive)
pub fn generate_jitter_ms(max_jitter_ms: u64) -> u64 {
    if max_jitter_ms == 0 {
        return 0;
    }
    rng().random_range(0..=max_jitter_ms)
}

/// Jitter of at most `jitter_percent` percent of `base_value`
///
/// ```
/// use stream_scheduler::utils::jitter::generate_jitter_percent;
///
/// assert!(generate_jitter_percent(4000, 25) <= 1000);
/// ```
pub fn generate_jitter_percent(base_value: u64, jitter_percent: u8) -> u64 {
    let max_jitter = base_value.saturating_mul(u64::from(jitter_percent)) / 100;
    generate_jitter_ms(max_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_bounds_give_no_jitter() {
        assert_eq!(generate_jitter_ms(0), 0);
        assert_eq!(generate_jitter_percent(1000, 0), 0);
        assert_eq!(generate_jitter_percent(0, 25), 0);
    }

    #[test]
    fn test_jitter_stays_within_percentage() {
        for _ in 0..200 {
            assert!(generate_jitter_percent(5000, 25) <= 1250);
        }
    }
}
