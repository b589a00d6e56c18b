//! Completion percentage for an execution.
//!
//! Conversation counts are preferred over the worker's raw percentage
//! whenever a total is known. The two scales are not aligned: a run that
//! reported 40% raw can read 10% once the first conversation counts arrive.
//! That jump is surfaced as-is and not smoothed.

/// Derive a 0..=100 completion percentage.
///
/// With `total > 0` the result is `round(100 * executed / total)` clamped to
/// 100. Otherwise the raw percentage is used (clamped), or 0 when absent.
pub fn compute_progress(executed: u64, total: u64, raw_progress: Option<f64>) -> u8 {
    if total > 0 {
        let pct = (executed as f64 * 100.0 / total as f64).round();
        return pct.clamp(0.0, 100.0) as u8;
    }

    match raw_progress {
        Some(raw) if raw.is_finite() => raw.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_take_precedence() {
        assert_eq!(compute_progress(3, 10, None), 30);
        assert_eq!(compute_progress(3, 10, Some(90.0)), 30);
        assert_eq!(compute_progress(1, 3, None), 33);
        assert_eq!(compute_progress(2, 3, None), 67);
    }

    #[test]
    fn test_raw_fallback() {
        assert_eq!(compute_progress(0, 0, Some(42.0)), 42);
        assert_eq!(compute_progress(0, 0, Some(42.6)), 43);
        assert_eq!(compute_progress(5, 0, None), 0);
    }

    #[test]
    fn test_out_of_range_inputs_are_clamped() {
        assert_eq!(compute_progress(12, 10, None), 100);
        assert_eq!(compute_progress(0, 0, Some(-5.0)), 0);
        assert_eq!(compute_progress(0, 0, Some(250.0)), 100);
        assert_eq!(compute_progress(0, 0, Some(f64::NAN)), 0);
    }

    #[test]
    fn test_bounded_and_monotonic_in_executed() {
        for total in 1..=50u64 {
            let mut last = 0u8;
            for executed in 0..=total + 5 {
                let pct = compute_progress(executed, total, None);
                assert!(pct <= 100);
                assert!(pct >= last, "regressed at {executed}/{total}");
                last = pct;
            }
        }
    }
}
