//! Pure freeze-sweeper eligibility.
//!
//! The sweeper freezes cells whose last check is older than the threshold
//! plus a 10% margin, so it only ever freezes cells the lazy rule would also
//! freeze on the next uncheck attempt.

use crate::constants::SWEEP_SAFETY_MARGIN_DIVISOR;

/// Timestamps strictly older than the returned cutoff are eligible.
#[inline]
pub fn sweep_cutoff_ms(now_ms: u64, threshold_ms: u64) -> u64 {
    let margin = threshold_ms / SWEEP_SAFETY_MARGIN_DIVISOR;
    now_ms.saturating_sub(threshold_ms).saturating_sub(margin)
}

/// True when a cell checked at `checked_at_ms` may be swept.
#[inline]
pub fn sweep_eligible(checked_at_ms: u64, cutoff_ms: u64) -> bool {
    checked_at_ms < cutoff_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_includes_margin() {
        assert_eq!(sweep_cutoff_ms(100_000, 10_000), 89_000);
    }

    #[test]
    fn cutoff_saturates_early_in_time() {
        assert_eq!(sweep_cutoff_ms(500, 10_000), 0);
    }

    #[test]
    fn eligibility() {
        assert!(sweep_eligible(88_999, 89_000));
        assert!(!sweep_eligible(89_000, 89_000));
        assert!(sweep_eligible(0, 89_000));
        assert!(!sweep_eligible(0, 0));
    }
}
