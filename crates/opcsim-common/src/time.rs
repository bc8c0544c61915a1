//! ---
//! opcsim_section: "01-core-functionality"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Shared primitives and utilities for the simulation runtime."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

/// Capture an instant suitable for tick comparisons.
pub fn monotonic_now() -> Instant {
    Instant::now()
}

/// Convert a duration into microseconds, saturating at `u64::MAX`.
pub fn duration_to_micros(duration: Duration) -> u64 {
    duration.as_secs().saturating_mul(1_000_000) + u64::from(duration.subsec_micros())
}

/// Signed difference between an observed tick and its nominal period, in
/// microseconds. Positive values mean the tick ran late.
pub fn jitter_us(actual: Duration, expected: Duration) -> i64 {
    let actual_us = actual.as_secs_f64() * 1_000_000.0;
    let expected_us = expected.as_secs_f64() * 1_000_000.0;
    (actual_us - expected_us).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_conversion_covers_subsecond_parts() {
        assert_eq!(duration_to_micros(Duration::from_millis(1500)), 1_500_000);
    }

    #[test]
    fn jitter_sign_tracks_lateness() {
        assert!(jitter_us(Duration::from_millis(110), Duration::from_millis(100)) > 0);
        assert!(jitter_us(Duration::from_millis(90), Duration::from_millis(100)) < 0);
    }
}
