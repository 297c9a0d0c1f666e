//! Backoff Calculation
//!
//! Pure exponential-backoff-with-jitter computation for clients that were
//! denied and want to know how long to wait. Delay grows as
//! `base * 2^(attempt-1)`, capped at 30 seconds, plus up to 10% uniform
//! jitter of the exponential term to avoid thundering herds.

use rand::Rng;
use std::time::Duration;

/// Default base delay for the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Ceiling on the exponential term.
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Fraction of the exponential term added as random jitter.
pub const JITTER_FACTOR: f64 = 0.1;

/// Compute the retry delay for the given attempt (1-based).
pub fn calculate_backoff(attempt: u32, base_delay: Duration) -> Duration {
    calculate_backoff_with(attempt, base_delay, &mut rand::rng())
}

/// Compute the retry delay using a caller-supplied RNG.
///
/// Seeding the RNG makes the jitter deterministic in tests.
pub fn calculate_backoff_with<R: Rng + ?Sized>(
    attempt: u32,
    base_delay: Duration,
    rng: &mut R,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let exponential = base_delay
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(MAX_BACKOFF);

    let jitter = exponential.mul_f64(JITTER_FACTOR * rng.random::<f64>());
    exponential.saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let base = Duration::from_millis(1000);

        for attempt in 1..=5u32 {
            let delay = calculate_backoff(attempt, base);
            let expected = base * 2u32.pow(attempt - 1);
            assert!(delay >= expected, "attempt {attempt}: {delay:?} < {expected:?}");
            assert!(delay <= expected.mul_f64(1.0 + JITTER_FACTOR));
        }
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let delay = calculate_backoff(20, Duration::from_millis(1000));
        assert!(delay <= MAX_BACKOFF.mul_f64(1.0 + JITTER_FACTOR));
    }

    #[test]
    fn test_backoff_huge_attempt_does_not_overflow() {
        let delay = calculate_backoff(u32::MAX, Duration::from_millis(1000));
        assert!(delay <= MAX_BACKOFF.mul_f64(1.0 + JITTER_FACTOR));
    }

    #[test]
    fn test_backoff_deterministic_with_seeded_rng() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);

        for attempt in 1..=10 {
            let da = calculate_backoff_with(attempt, DEFAULT_BASE_DELAY, &mut a);
            let db = calculate_backoff_with(attempt, DEFAULT_BASE_DELAY, &mut b);
            assert_eq!(da, db);
        }
    }

    #[test]
    fn test_backoff_monotonic_without_jitter() {
        struct ZeroRng;
        impl rand::RngCore for ZeroRng {
            fn next_u32(&mut self) -> u32 {
                0
            }
            fn next_u64(&mut self) -> u64 {
                0
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                dest.fill(0);
            }
        }

        let mut rng = ZeroRng;
        let mut previous = Duration::ZERO;
        for attempt in 1..=16 {
            let delay = calculate_backoff_with(attempt, DEFAULT_BASE_DELAY, &mut rng);
            assert!(delay >= previous);
            previous = delay;
        }
        assert_eq!(previous, MAX_BACKOFF);
    }
}
