//! Progress computation
//!
//! Adaptive streams may download several variants in parallel, so the engine
//! reports a set of loaded time ranges rather than a byte count.

use bridge_traits::TimeRange;

/// Fraction of `expected` covered by `loaded`, clamped to `[0, 1]`.
///
/// Loaded durations are summed, not merged: overlapping variant ranges can
/// push the sum past the expected duration, which the clamp absorbs.
/// Non-finite or negative durations are ignored. An empty expected range
/// yields `0.0`.
pub fn fraction_complete(loaded: &[TimeRange], expected: &TimeRange) -> f64 {
    let expected_secs = expected.duration_secs;
    if !expected_secs.is_finite() || expected_secs <= 0.0 {
        return 0.0;
    }

    let loaded_secs: f64 = loaded
        .iter()
        .map(|range| range.duration_secs)
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .sum();

    (loaded_secs / expected_secs).clamp(0.0, 1.0)
}

/// Keep progress non-decreasing for a single download.
pub fn advance(previous: f64, reported: f64) -> f64 {
    previous.max(reported).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(duration: f64) -> TimeRange {
        TimeRange::new(0.0, duration)
    }

    #[test]
    fn test_sums_ranges() {
        let loaded = [TimeRange::new(0.0, 10.0), TimeRange::new(10.0, 15.0)];
        assert!((fraction_complete(&loaded, &range(100.0)) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overlapping_variants_clamp() {
        let loaded = [range(80.0), range(80.0)];
        assert_eq!(fraction_complete(&loaded, &range(100.0)), 1.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(fraction_complete(&[range(10.0)], &range(0.0)), 0.0);
        assert_eq!(fraction_complete(&[range(10.0)], &range(f64::NAN)), 0.0);
        assert_eq!(fraction_complete(&[], &range(100.0)), 0.0);
        assert_eq!(
            fraction_complete(&[range(-5.0), range(f64::INFINITY), range(5.0)], &range(10.0)),
            0.5
        );
    }

    #[test]
    fn test_advance_is_monotonic() {
        assert_eq!(advance(0.5, 0.3), 0.5);
        assert_eq!(advance(0.5, 0.7), 0.7);
        assert_eq!(advance(0.0, 2.0), 1.0);
    }
}
