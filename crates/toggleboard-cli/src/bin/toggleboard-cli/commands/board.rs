//! Board counter and setting commands.
//!
//! Counter writes go straight to the store and are visible to every node on
//! its next toggle.

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Subcommand;

use toggleboard_core::BoardStore;

use crate::output::Outputable;
use crate::output::format_timestamp_ms;
use crate::output::print_output;
use crate::output::print_success;

/// Board operations.
#[derive(Subcommand)]
pub enum BoardCommand {
    /// Show counters, freeze threshold and store time.
    Status,

    /// Change the freeze threshold used by every node.
    SetFreezeThreshold(SetFreezeThresholdArgs),

    /// Overwrite the toggle counter.
    SetCount(SetCountArgs),

    /// Recompute both counters from the bitsets.
    Reconcile,
}

#[derive(Args)]
pub struct SetFreezeThresholdArgs {
    /// Threshold in milliseconds.
    pub threshold_ms: u64,
}

#[derive(Args)]
pub struct SetCountArgs {
    /// New toggle counter value.
    pub value: u64,
}

/// `board status` output.
pub struct BoardStatusOutput {
    pub count: u64,
    pub frozen_count: u64,
    pub checked_bits: u64,
    pub frozen_bits: u64,
    pub freeze_threshold_ms: Option<u64>,
    pub server_time_ms: u64,
}

impl Outputable for BoardStatusOutput {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "count": self.count,
            "frozen_count": self.frozen_count,
            "checked_bits": self.checked_bits,
            "frozen_bits": self.frozen_bits,
            "freeze_threshold_ms": self.freeze_threshold_ms,
            "server_time_ms": self.server_time_ms
        })
    }

    fn to_human(&self) -> String {
        let threshold =
            self.freeze_threshold_ms.map(|ms| format!("{} ms", ms)).unwrap_or_else(|| "disabled".to_string());
        let mut out = format!(
            "Board Status\n\
             ============\n\
             Toggle counter:   {}\n\
             Checked bits:     {}\n\
             Frozen counter:   {}\n\
             Frozen bits:      {}\n\
             Freeze threshold: {}\n\
             Server time:      {}",
            self.count,
            self.checked_bits,
            self.frozen_count,
            self.frozen_bits,
            threshold,
            format_timestamp_ms(self.server_time_ms)
        );
        if self.count != self.checked_bits || self.frozen_count != self.frozen_bits {
            out.push_str("\n\nCounters differ from the bitsets; run `board reconcile` to recount.");
        }
        out
    }
}

/// `board reconcile` output.
pub struct ReconcileOutput {
    pub previous_count: u64,
    pub previous_frozen_count: u64,
    pub count: u64,
    pub frozen_count: u64,
}

impl Outputable for ReconcileOutput {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "previous_count": self.previous_count,
            "previous_frozen_count": self.previous_frozen_count,
            "count": self.count,
            "frozen_count": self.frozen_count
        })
    }

    fn to_human(&self) -> String {
        format!(
            "Toggle counter: {} -> {}\nFrozen counter: {} -> {}",
            self.previous_count, self.count, self.previous_frozen_count, self.frozen_count
        )
    }
}

impl BoardCommand {
    /// Execute the board command.
    pub async fn run(self, store: &dyn BoardStore, json: bool) -> Result<()> {
        match self {
            BoardCommand::Status => {
                print_output(&board_status(store).await?, json);
            }
            BoardCommand::SetFreezeThreshold(args) => {
                store.set_freeze_threshold(args.threshold_ms).await.context("failed to set freeze threshold")?;
                print_success(&format!("freeze threshold set to {} ms", args.threshold_ms), json);
            }
            BoardCommand::SetCount(args) => {
                store.set_toggle_count(args.value).await.context("failed to set toggle counter")?;
                print_success(&format!("toggle counter set to {}", args.value), json);
            }
            BoardCommand::Reconcile => {
                print_output(&board_reconcile(store).await?, json);
            }
        }
        Ok(())
    }
}

fn count_ones(bytes: &[u8]) -> u64 {
    bytes.iter().map(|byte| u64::from(byte.count_ones())).sum()
}

async fn board_status(store: &dyn BoardStore) -> Result<BoardStatusOutput> {
    let state = store.board_state().await.context("failed to read board state")?;
    let freeze_threshold_ms = store.freeze_threshold().await.context("failed to read freeze threshold")?;
    let server_time_ms = store.server_time_ms().await.context("failed to read store time")?;
    Ok(BoardStatusOutput {
        count: state.count,
        frozen_count: state.frozen_count,
        checked_bits: count_ones(&state.bits),
        frozen_bits: count_ones(&state.frozen),
        freeze_threshold_ms,
        server_time_ms,
    })
}

async fn board_reconcile(store: &dyn BoardStore) -> Result<ReconcileOutput> {
    let before = store.board_state().await.context("failed to read board state")?;
    let (count, frozen_count) = store.reconcile_counters().await.context("failed to reconcile counters")?;
    Ok(ReconcileOutput {
        previous_count: before.count,
        previous_frozen_count: before.frozen_count,
        count,
        frozen_count,
    })
}

#[cfg(test)]
mod tests {
    use toggleboard_core::BoardSettings;
    use toggleboard_core::InMemoryBoardStore;
    use toggleboard_core::InitialCount;

    use super::*;

    async fn capped_board() -> InMemoryBoardStore {
        let store = InMemoryBoardStore::new();
        store
            .initialize(&BoardSettings {
                total_cells: 32,
                global_cap: 16,
                freeze_threshold_ms: 5_000,
                initial_count: InitialCount::Cap,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn status_flags_counter_drift() {
        let store = capped_board().await;
        let status = board_status(&store).await.unwrap();
        assert_eq!(status.count, 16);
        assert_eq!(status.checked_bits, 0);
        assert_eq!(status.freeze_threshold_ms, Some(5_000));
        assert!(status.to_human().contains("board reconcile"));
        assert_eq!(status.to_json()["count"], 16);
    }

    #[tokio::test]
    async fn reconcile_reopens_a_capped_board() {
        let store = capped_board().await;
        assert_eq!(store.apply_toggle(1, 16).await.unwrap().delta, 0);

        let report = board_reconcile(&store).await.unwrap();
        assert_eq!(report.previous_count, 16);
        assert_eq!(report.count, 0);

        assert_eq!(store.apply_toggle(1, 16).await.unwrap().delta, 1);
        let status = board_status(&store).await.unwrap();
        assert_eq!(status.count, status.checked_bits);
        assert!(!status.to_human().contains("board reconcile"));
    }

    #[tokio::test]
    async fn set_commands_write_through() {
        let store = capped_board().await;
        BoardCommand::SetFreezeThreshold(SetFreezeThresholdArgs { threshold_ms: 60_000 }).run(&store, true).await.unwrap();
        BoardCommand::SetCount(SetCountArgs { value: 3 }).run(&store, true).await.unwrap();

        let status = board_status(&store).await.unwrap();
        assert_eq!(status.freeze_threshold_ms, Some(60_000));
        assert_eq!(status.count, 3);
    }
}
