//! The per-cell toggle state machine.
//!
//! A cell moves `Unchecked -> Checked -> {Unchecked | Frozen}`; `Frozen` is
//! terminal. A toggle request always asks for a flip, and [`next_transition`]
//! decides what actually happens. Both store backends evaluate this same
//! decision inside their atomic transaction (the Redis script mirrors it
//! guard for guard).
//!
//! Guards are evaluated in a fixed order:
//!
//! 1. the cell is frozen: no-op
//! 2. the toggle counter is at or above the cap: no-op, in both directions
//! 3. an uncheck of a cell checked at least `threshold` ago freezes it instead
//! 4. otherwise the bit flips
//!
//! A cell that is frozen and at the cap reports frozen, never cap reached.
//!
//! # Tiger Style
//!
//! - Time is passed explicitly
//! - Saturating arithmetic on timestamps

use crate::error::ValidationError;
use crate::types::ToggleOutcome;

/// Observable state of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// Bit is 0.
    Unchecked,
    /// Bit is 1 and the cell can still change.
    Checked,
    /// Bit is 1 and the cell is permanently locked.
    Frozen,
}

impl CellState {
    /// Derive the state from the two bitsets.
    #[inline]
    pub fn of(bit: bool, frozen: bool) -> Self {
        match (bit, frozen) {
            (_, true) => CellState::Frozen,
            (true, false) => CellState::Checked,
            (false, false) => CellState::Unchecked,
        }
    }
}

/// Everything the transaction reads before deciding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleRead {
    /// Current checkbox bit.
    pub bit: bool,
    /// Current frozen bit.
    pub frozen: bool,
    /// Last-checked timestamp, `None` when the cell has no entry.
    pub last_checked_ms: Option<u64>,
    /// Current toggle counter.
    pub count: u64,
    /// Live freeze threshold, `None` when freezing is disabled.
    pub freeze_threshold_ms: Option<u64>,
    /// Store time at the start of the transaction.
    pub now_ms: u64,
}

/// Decision taken by the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Guard 1: the cell is frozen.
    AlreadyFrozen,
    /// Guard 2: the global cap is reached.
    CapReached,
    /// The cell becomes checked; record `now` as its last-checked time.
    Check {
        /// Timestamp to store.
        at_ms: u64,
    },
    /// The cell becomes unchecked; clear its last-checked time.
    Uncheck,
    /// The uncheck is replaced by a freeze.
    Freeze,
}

impl Transition {
    /// Outcome reported to the caller given the bit before the transaction.
    pub fn outcome(&self, current_bit: bool) -> ToggleOutcome {
        match self {
            Transition::AlreadyFrozen | Transition::CapReached => ToggleOutcome::unchanged(current_bit),
            Transition::Check { .. } => ToggleOutcome {
                bit: true,
                delta: 1,
                frozen: false,
            },
            Transition::Uncheck => ToggleOutcome {
                bit: false,
                delta: -1,
                frozen: false,
            },
            Transition::Freeze => ToggleOutcome::freeze(),
        }
    }
}

/// Decide the transition for a toggle request against `cap`.
pub fn next_transition(read: &ToggleRead, cap: u64) -> Transition {
    if read.frozen {
        return Transition::AlreadyFrozen;
    }
    if read.count >= cap {
        return Transition::CapReached;
    }
    if !read.bit {
        return Transition::Check { at_ms: read.now_ms };
    }
    match (read.last_checked_ms, read.freeze_threshold_ms) {
        (Some(last), Some(threshold)) if freeze_due(last, read.now_ms, threshold) => Transition::Freeze,
        _ => Transition::Uncheck,
    }
}

/// True when a cell checked at `last_checked_ms` is old enough to freeze.
///
/// Tracking is the presence of a timestamp, so a check at time 0 counts.
#[inline]
pub fn freeze_due(last_checked_ms: u64, now_ms: u64, threshold_ms: u64) -> bool {
    now_ms.saturating_sub(last_checked_ms) >= threshold_ms
}

/// Check a client-supplied index against the board size.
pub fn validate_index(index: i64, total_cells: u64) -> Result<u64, ValidationError> {
    match u64::try_from(index) {
        Ok(index) if index < total_cells => Ok(index),
        _ => Err(ValidationError::IndexOutOfRange {
            index,
            total: total_cells,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(bit: bool, frozen: bool, last: Option<u64>, count: u64, now: u64) -> ToggleRead {
        ToggleRead {
            bit,
            frozen,
            last_checked_ms: last,
            count,
            freeze_threshold_ms: Some(1000),
            now_ms: now,
        }
    }

    #[test]
    fn unchecked_cell_gets_checked() {
        let t = next_transition(&read(false, false, None, 0, 50), 10);
        assert_eq!(t, Transition::Check { at_ms: 50 });
        assert_eq!(t.outcome(false), ToggleOutcome {
            bit: true,
            delta: 1,
            frozen: false
        });
    }

    #[test]
    fn recent_check_unchecks() {
        let t = next_transition(&read(true, false, Some(100), 1, 1099), 10);
        assert_eq!(t, Transition::Uncheck);
        assert_eq!(t.outcome(true).delta, -1);
    }

    #[test]
    fn old_check_freezes_at_exact_threshold() {
        let t = next_transition(&read(true, false, Some(100), 1, 1100), 10);
        assert_eq!(t, Transition::Freeze);
        assert_eq!(t.outcome(true), ToggleOutcome::freeze());
    }

    #[test]
    fn untracked_checked_cell_unchecks() {
        let t = next_transition(&read(true, false, None, 1, 1_000_000), 10);
        assert_eq!(t, Transition::Uncheck);
    }

    #[test]
    fn disabled_threshold_never_freezes() {
        let mut r = read(true, false, Some(1), 1, u64::MAX);
        r.freeze_threshold_ms = None;
        assert_eq!(next_transition(&r, 10), Transition::Uncheck);
    }

    #[test]
    fn cap_blocks_both_directions() {
        assert_eq!(next_transition(&read(false, false, None, 10, 0), 10), Transition::CapReached);
        assert_eq!(next_transition(&read(true, false, Some(1), 10, 0), 10), Transition::CapReached);
        assert_eq!(next_transition(&read(true, false, Some(1), 10, 0), 10).outcome(true), ToggleOutcome::unchanged(true));
    }

    #[test]
    fn frozen_wins_over_cap() {
        let t = next_transition(&read(true, true, Some(1), 10, 5000), 10);
        assert_eq!(t, Transition::AlreadyFrozen);
    }

    #[test]
    fn cell_state_from_bits() {
        assert_eq!(CellState::of(false, false), CellState::Unchecked);
        assert_eq!(CellState::of(true, false), CellState::Checked);
        assert_eq!(CellState::of(true, true), CellState::Frozen);
    }

    #[test]
    fn freeze_due_counts_epoch_checks_and_ignores_clock_skew() {
        assert!(freeze_due(0, 1000, 1000));
        assert!(!freeze_due(0, 999, 1000));
        assert!(!freeze_due(5000, 4000, 1));
    }

    #[test]
    fn check_at_epoch_freezes_after_threshold() {
        let check = next_transition(&read(false, false, None, 0, 0), 10);
        assert_eq!(check, Transition::Check { at_ms: 0 });
        assert_eq!(next_transition(&read(true, false, Some(0), 1, 1500), 10), Transition::Freeze);
        assert_eq!(next_transition(&read(true, false, Some(0), 1, 999), 10), Transition::Uncheck);
    }

    #[test]
    fn validate_index_bounds() {
        assert_eq!(validate_index(0, 10), Ok(0));
        assert_eq!(validate_index(9, 10), Ok(9));
        assert!(validate_index(10, 10).is_err());
        assert!(validate_index(-1, 10).is_err());
    }
}
