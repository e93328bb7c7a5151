//! Operator maintenance jobs shared by the node and the CLI.
//!
//! - The freeze sweeper walks the last-checked timestamps and freezes cells
//!   the lazy rule would freeze on their next uncheck.
//! - Audit retention deletes daily audit lists past the retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use toggleboard_core::AuditRecord;
use toggleboard_core::AuditTag;
use toggleboard_core::BoardStore;
use toggleboard_core::FreezeEvent;
use toggleboard_core::StoreError;
use toggleboard_core::pure::audit_day;
use toggleboard_core::pure::format_entry;
use toggleboard_core::pure::is_expired;
use toggleboard_core::pure::sweep_cutoff_ms;
use toggleboard_core::pure::sweep_eligible;

/// Client key recorded on audit entries written by the sweeper.
pub const SWEEPER_CLIENT_KEY: &str = "freeze-sweeper";

/// Result of one freeze sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Store time the sweep started at.
    pub now_ms: u64,
    /// Timestamps older than this were eligible.
    pub cutoff_ms: u64,
    /// Timestamps inspected.
    pub scanned: u64,
    /// Cells frozen by this sweep.
    pub frozen: Vec<u64>,
    /// False when no freeze threshold is configured.
    pub enabled: bool,
}

/// Freeze every checked cell whose last check is older than the threshold plus a 10% margin.
///
/// Each freeze is conditional inside the store, so a sweep racing live toggles
/// never freezes a cell that was unchecked in the meantime. Swept freezes are
/// audited with the `frozen` tag like lazy ones, under [`SWEEPER_CLIENT_KEY`].
pub async fn sweep_freezes(
    store: &dyn BoardStore,
    page_size: usize,
    max_audit_entries_per_day: u64,
) -> Result<SweepReport, StoreError> {
    let now_ms = store.server_time_ms().await?;
    let Some(threshold_ms) = store.freeze_threshold().await? else {
        return Ok(SweepReport {
            now_ms,
            ..SweepReport::default()
        });
    };
    let cutoff_ms = sweep_cutoff_ms(now_ms, threshold_ms);
    let mut report = SweepReport {
        now_ms,
        cutoff_ms,
        enabled: true,
        ..SweepReport::default()
    };

    let mut cursor = 0;
    loop {
        let page = store.scan_last_checked(cursor, page_size.max(1)).await?;
        for (index, checked_at_ms) in page.entries {
            report.scanned += 1;
            if !sweep_eligible(checked_at_ms, cutoff_ms) {
                continue;
            }
            if store.freeze_if_stale(index, cutoff_ms).await? {
                report.frozen.push(index);
                let event = FreezeEvent {
                    index,
                    timestamp_ms: now_ms,
                };
                if let Err(err) = store.publish_freeze(&event).await {
                    warn!(index, error = %err, "failed to announce swept freeze");
                }
            }
        }
        if page.next_cursor == 0 {
            break;
        }
        cursor = page.next_cursor;
    }

    if !report.frozen.is_empty() {
        let entries: Vec<String> = report
            .frozen
            .iter()
            .map(|&index| {
                format_entry(&AuditRecord {
                    client_key: SWEEPER_CLIENT_KEY.to_string(),
                    index,
                    state: true,
                    tag: AuditTag::Frozen,
                    timestamp_ms: now_ms,
                })
            })
            .collect();
        if let Err(err) = store.append_audit(audit_day(now_ms), &entries, max_audit_entries_per_day).await {
            warn!(frozen = entries.len(), error = %err, "failed to audit swept freezes");
        }
    }

    info!(scanned = report.scanned, frozen = report.frozen.len(), cutoff_ms, "freeze sweep finished");
    Ok(report)
}

/// Result of one audit retention pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Reference day for the retention window.
    pub today: NaiveDate,
    /// Days kept.
    pub retention_days: u32,
    /// Days deleted, or that would be deleted in a dry run.
    pub expired: Vec<NaiveDate>,
    /// True when nothing was deleted on purpose.
    pub dry_run: bool,
}

/// Delete audit lists older than `retention_days` before `today`.
pub async fn cleanup_audit_logs(
    store: &dyn BoardStore,
    today: NaiveDate,
    retention_days: u32,
    dry_run: bool,
) -> Result<CleanupReport, StoreError> {
    let mut expired: Vec<NaiveDate> =
        store.audit_days().await?.into_iter().filter(|day| is_expired(*day, today, retention_days)).collect();
    expired.sort();

    if !dry_run {
        for day in &expired {
            if store.delete_audit_day(*day).await? {
                debug!(%day, "audit list deleted");
            }
        }
    }

    info!(expired = expired.len(), retention_days, dry_run, "audit retention pass finished");
    Ok(CleanupReport {
        today,
        retention_days,
        expired,
        dry_run,
    })
}

/// Run [`sweep_freezes`] every `interval` until cancelled. Failures skip one round.
pub async fn run_freeze_sweeper(
    store: Arc<dyn BoardStore>,
    page_size: usize,
    max_audit_entries_per_day: u64,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<(), String> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                if let Err(err) = sweep_freezes(store.as_ref(), page_size, max_audit_entries_per_day).await {
                    warn!(error = %err, "freeze sweep failed");
                }
            }
        }
    }
}

/// Run [`cleanup_audit_logs`] every `interval` until cancelled. Failures skip one round.
pub async fn run_audit_retention(
    store: Arc<dyn BoardStore>,
    retention_days: u32,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<(), String> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                let today = chrono::Utc::now().date_naive();
                if let Err(err) = cleanup_audit_logs(store.as_ref(), today, retention_days, false).await {
                    warn!(error = %err, "audit retention pass failed");
                }
            }
        }
    }
}
