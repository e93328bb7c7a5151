//! Freeze maintenance commands.

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Subcommand;

use toggleboard_core::BoardStore;
use toggleboard_core::constants::DEFAULT_MAX_AUDIT_ENTRIES_PER_DAY;
use toggleboard_node::maintenance::SweepReport;
use toggleboard_node::maintenance::sweep_freezes;

use crate::output::Outputable;
use crate::output::format_timestamp_ms;
use crate::output::print_output;

/// Freeze operations.
#[derive(Subcommand)]
pub enum FreezeCommand {
    /// Freeze every cell that has stayed checked past the threshold.
    Sweep(SweepArgs),
}

#[derive(Args)]
pub struct SweepArgs {
    /// Timestamps read per scan page.
    #[arg(long, default_value = "1000")]
    pub page_size: usize,

    /// Cap on the daily audit list the swept freezes are appended to.
    #[arg(long, default_value_t = DEFAULT_MAX_AUDIT_ENTRIES_PER_DAY)]
    pub max_audit_entries: u64,
}

impl Outputable for SweepReport {
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
    }

    fn to_human(&self) -> String {
        if !self.enabled {
            return "Freeze threshold not set; nothing swept".to_string();
        }
        format!(
            "Scanned {} timestamp(s) older than {}\nFroze {} cell(s){}",
            self.scanned,
            format_timestamp_ms(self.cutoff_ms),
            self.frozen.len(),
            if self.frozen.is_empty() {
                String::new()
            } else {
                format!(": {:?}", self.frozen)
            }
        )
    }
}

impl FreezeCommand {
    /// Execute the freeze command.
    pub async fn run(self, store: &dyn BoardStore, json: bool) -> Result<()> {
        match self {
            FreezeCommand::Sweep(args) => {
                anyhow::ensure!(args.page_size > 0, "--page-size must be non-zero");
                let report = sweep_freezes(store, args.page_size, args.max_audit_entries).await.context("freeze sweep failed")?;
                print_output(&report, json);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use toggleboard_core::BoardSettings;
    use toggleboard_core::InMemoryBoardStore;
    use toggleboard_core::InitialCount;
    use toggleboard_core::SimulatedTimeProvider;

    use super::*;

    #[tokio::test]
    async fn sweep_freezes_stale_cells() {
        let clock = Arc::new(SimulatedTimeProvider::new(1_000_000));
        let store = InMemoryBoardStore::with_clock(clock.clone());
        store
            .initialize(&BoardSettings {
                total_cells: 16,
                global_cap: 16,
                freeze_threshold_ms: 1_000,
                initial_count: InitialCount::Zero,
            })
            .await
            .unwrap();
        store.apply_toggle(4, 16).await.unwrap();
        clock.advance_ms(5_000);

        let report = sweep_freezes(&store, 1, DEFAULT_MAX_AUDIT_ENTRIES_PER_DAY).await.unwrap();
        assert!(report.enabled);
        assert_eq!(report.frozen, vec![4]);
        assert!(report.to_human().contains("Froze 1 cell(s): [4]"));
        assert_eq!(report.to_json()["frozen"], serde_json::json!([4]));
    }

    #[test]
    fn disabled_sweep_is_reported() {
        let report = SweepReport::default();
        assert_eq!(report.to_human(), "Freeze threshold not set; nothing swept");
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let store = InMemoryBoardStore::new();
        let err = FreezeCommand::Sweep(SweepArgs {
            page_size: 0,
            max_audit_entries: DEFAULT_MAX_AUDIT_ENTRIES_PER_DAY,
        }).run(&store, false).await.unwrap_err();
        assert!(err.to_string().contains("page-size"));
    }
}
