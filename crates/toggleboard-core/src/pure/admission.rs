//! Pure abuse-scoring functions.
//!
//! A client key's score counts its gated attempts. Below `max_allowed` every
//! attempt passes. Above it, the pass probability halves for every
//! `unit_size` points of score, so rejection approaches certainty as the score
//! grows instead of cutting off hard at the threshold.
//!
//! # Tiger Style
//!
//! - The random draw is passed in, so decisions are deterministic under test
//! - Saturating arithmetic for decay

/// Probability in `[0, 1]` that an attempt with `score` passes.
///
/// A zero `unit_size` is treated as 1.
#[inline]
pub fn pass_probability(score: u64, max_allowed: u64, unit_size: u64) -> f64 {
    if score < max_allowed {
        return 1.0;
    }
    let units = score as f64 / unit_size.max(1) as f64;
    0.5_f64.powf(units)
}

/// Admission decision for `score` given a uniform draw in `[0, 1)`.
///
/// The attempt is rejected when the draw lands above the pass probability.
#[inline]
pub fn should_admit(score: u64, max_allowed: u64, unit_size: u64, draw: f64) -> bool {
    score < max_allowed || draw <= pass_probability(score, max_allowed, unit_size)
}

/// Points removed from every score on each decay cycle.
#[inline]
pub fn decay_amount(max_allowed: u64, mercy_ratio: u64) -> u64 {
    max_allowed.saturating_mul(mercy_ratio)
}

/// Score after one decay cycle, clamped at zero.
#[inline]
pub fn decayed_score(score: u64, amount: u64) -> u64 {
    score.saturating_sub(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_always_passes() {
        assert_eq!(pass_probability(999, 1000, 2500), 1.0);
        assert!(should_admit(999, 1000, 2500, 0.999_999));
    }

    #[test]
    fn probability_halves_per_unit() {
        assert!((pass_probability(2500, 1000, 2500) - 0.5).abs() < 1e-12);
        assert!((pass_probability(5000, 1000, 2500) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn high_draw_is_rejected_above_threshold() {
        assert!(!should_admit(5000, 1000, 2500, 0.9));
        assert!(should_admit(5000, 1000, 2500, 0.1));
    }

    #[test]
    fn zero_unit_size_does_not_divide_by_zero() {
        let p = pass_probability(10, 1, 0);
        assert!(p > 0.0 && p < 0.01);
    }

    #[test]
    fn decay_clamps_at_zero() {
        let amount = decay_amount(1000, 8);
        assert_eq!(amount, 8000);
        assert_eq!(decayed_score(9000, amount), 1000);
        assert_eq!(decayed_score(7000, amount), 0);
        assert_eq!(decay_amount(u64::MAX, 8), u64::MAX);
    }
}
