//! Property-based tests for the board invariants.
//!
//! Random toggle sequences with random clock advances are applied to the
//! in-memory store, and after every transaction:
//! - the toggle counter equals the checkbox popcount
//! - the frozen counter equals the frozen popcount
//! - every frozen cell is checked and never changes again
//! - a counter at or above the cap blocks every mutation

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use toggleboard_core::BoardSettings;
use toggleboard_core::BoardStore;
use toggleboard_core::Bitset;
use toggleboard_core::InMemoryBoardStore;
use toggleboard_core::InitialCount;
use toggleboard_core::SimulatedTimeProvider;
use toggleboard_core::pure::CellState;

const CELLS: u64 = 16;
const THRESHOLD_MS: u64 = 1000;

fn arbitrary_ops() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((0..CELLS, 0u64..2500), 1..120)
}

async fn board(cap: u64, initial_count: InitialCount) -> (InMemoryBoardStore, SimulatedTimeProvider) {
    let clock = SimulatedTimeProvider::new(1_000_000);
    let store = InMemoryBoardStore::with_clock(Arc::new(clock.clone()));
    let settings = BoardSettings {
        total_cells: CELLS,
        global_cap: cap,
        freeze_threshold_ms: THRESHOLD_MS,
        initial_count,
    };
    store.initialize(&settings).await.unwrap();
    (store, clock)
}

fn cell_states(bits: &Bitset, frozen: &Bitset) -> Vec<CellState> {
    (0..CELLS).map(|i| CellState::of(bits.get(i), frozen.get(i))).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn test_counters_match_popcounts(ops in arbitrary_ops(), cap in 0u64..20) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (store, clock) = board(cap, InitialCount::Zero).await;
            let mut frozen_seen: HashSet<u64> = HashSet::new();

            for (index, advance) in ops {
                clock.advance_ms(advance);
                let before = store.board_state().await.map_err(|e| TestCaseError::fail(e.to_string()))?;
                let outcome = store.apply_toggle(index, cap).await.map_err(|e| TestCaseError::fail(e.to_string()))?;
                let after = store.board_state().await.map_err(|e| TestCaseError::fail(e.to_string()))?;

                let bits = Bitset::from_bytes(after.bits.clone(), CELLS);
                let frozen = Bitset::from_bytes(after.frozen.clone(), CELLS);
                prop_assert_eq!(after.count, bits.count_ones());
                prop_assert_eq!(after.frozen_count, frozen.count_ones());
                prop_assert_eq!(after.count as i64 - before.count as i64, outcome.delta);

                for i in 0..CELLS {
                    if frozen.get(i) {
                        prop_assert!(bits.get(i), "frozen cell {} is unchecked", i);
                    }
                }
                if frozen_seen.contains(&index) {
                    prop_assert_eq!(&before.bits, &after.bits);
                    prop_assert_eq!(&before.frozen, &after.frozen);
                }
                if outcome.frozen {
                    frozen_seen.insert(index);
                }
                if before.count >= cap {
                    prop_assert_eq!(&before.bits, &after.bits);
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn test_single_index_reaches_one_state(advances in prop::collection::vec(0u64..2000, 1..60)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (store, clock) = board(CELLS, InitialCount::Zero).await;
            let mut frozen_at: Option<usize> = None;

            for (step, advance) in advances.iter().enumerate() {
                clock.advance_ms(*advance);
                let outcome = store.apply_toggle(3, CELLS).await.map_err(|e| TestCaseError::fail(e.to_string()))?;
                if frozen_at.is_some() {
                    prop_assert_eq!(outcome.delta, 0);
                    prop_assert!(outcome.bit);
                    prop_assert!(!outcome.frozen);
                }
                if outcome.frozen {
                    prop_assert!(frozen_at.is_none());
                    frozen_at = Some(step);
                }
            }

            let state = store.board_state().await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            let states = cell_states(&Bitset::from_bytes(state.bits, CELLS), &Bitset::from_bytes(state.frozen, CELLS));
            let expected = if frozen_at.is_some() { CellState::Frozen } else if state.count == 1 { CellState::Checked } else { CellState::Unchecked };
            prop_assert_eq!(states[3], expected);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn test_cap_blocks_every_direction(ops in arbitrary_ops(), cap in 1u64..8) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (store, clock) = board(cap, InitialCount::Cap).await;
            for (index, advance) in ops {
                clock.advance_ms(advance);
                let outcome = store.apply_toggle(index, cap).await.map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert!(!outcome.changed());
                prop_assert!(!outcome.frozen);
            }
            let state = store.board_state().await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(Bitset::from_bytes(state.bits, CELLS).count_ones(), 0);
            prop_assert_eq!(state.count, cap);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
