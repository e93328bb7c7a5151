//! Audit log commands.

use anyhow::Context;
use anyhow::Result;
use chrono::NaiveDate;
use chrono::Utc;
use clap::Args;
use clap::Subcommand;

use toggleboard_core::BoardStore;
use toggleboard_node::maintenance::CleanupReport;
use toggleboard_node::maintenance::cleanup_audit_logs;

use crate::output::Outputable;
use crate::output::print_output;

/// Audit log operations.
#[derive(Subcommand)]
pub enum LogsCommand {
    /// List the days that have an audit list.
    List,

    /// Print the entries of one day.
    Show(ShowArgs),

    /// Delete audit lists older than the retention window.
    Cleanup(CleanupArgs),
}

#[derive(Args)]
pub struct ShowArgs {
    /// Day in YYYY-MM-DD form (UTC).
    pub day: NaiveDate,

    /// Maximum number of entries, oldest first.
    #[arg(long)]
    pub limit: Option<u32>,
}

#[derive(Args)]
pub struct CleanupArgs {
    /// Days to keep, counting back from today.
    #[arg(long, default_value = "30")]
    pub days: u32,

    /// Report what would be deleted without deleting it.
    #[arg(long)]
    pub dry_run: bool,
}

/// `logs list` output.
pub struct AuditDaysOutput {
    pub days: Vec<NaiveDate>,
}

impl Outputable for AuditDaysOutput {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "days": self.days.iter().map(ToString::to_string).collect::<Vec<_>>()
        })
    }

    fn to_human(&self) -> String {
        if self.days.is_empty() {
            return "No audit lists".to_string();
        }
        self.days.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
    }
}

/// `logs show` output.
pub struct AuditEntriesOutput {
    pub day: NaiveDate,
    pub entries: Vec<String>,
}

impl Outputable for AuditEntriesOutput {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "day": self.day.to_string(),
            "count": self.entries.len(),
            "entries": self.entries
        })
    }

    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return format!("No audit entries for {}", self.day);
        }
        self.entries.join("\n")
    }
}

impl Outputable for CleanupReport {
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
    }

    fn to_human(&self) -> String {
        let verb = if self.dry_run { "Would delete" } else { "Deleted" };
        if self.expired.is_empty() {
            return format!("No audit lists older than {} days before {}", self.retention_days, self.today);
        }
        let days = self.expired.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        format!("{} {} audit list(s): {}", verb, self.expired.len(), days)
    }
}

impl LogsCommand {
    /// Execute the logs command.
    pub async fn run(self, store: &dyn BoardStore, json: bool) -> Result<()> {
        match self {
            LogsCommand::List => print_output(&logs_list(store).await?, json),
            LogsCommand::Show(args) => print_output(&logs_show(store, args).await?, json),
            LogsCommand::Cleanup(args) => {
                let report = cleanup_audit_logs(store, Utc::now().date_naive(), args.days, args.dry_run)
                    .await
                    .context("failed to clean up audit lists")?;
                print_output(&report, json);
            }
        }
        Ok(())
    }
}

async fn logs_list(store: &dyn BoardStore) -> Result<AuditDaysOutput> {
    let mut days = store.audit_days().await.context("failed to list audit days")?;
    days.sort();
    Ok(AuditDaysOutput { days })
}

async fn logs_show(store: &dyn BoardStore, args: ShowArgs) -> Result<AuditEntriesOutput> {
    let stop = match args.limit {
        Some(0) => {
            return Ok(AuditEntriesOutput {
                day: args.day,
                entries: Vec::new(),
            });
        }
        Some(limit) => i64::from(limit) - 1,
        None => -1,
    };
    let entries = store.read_audit(args.day, 0, stop).await.context("failed to read audit list")?;
    Ok(AuditEntriesOutput { day: args.day, entries })
}
