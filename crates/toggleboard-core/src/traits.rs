//! The shared board store interface.
//!
//! A [`BoardStore`] is the single source of truth for the board: both bitsets,
//! both counters, last-checked timestamps, the freeze threshold, the daily
//! audit lists and the change feed. Connection handlers never cache any of it.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::error::StoreError;
use crate::feed::FeedSubscription;
use crate::types::BoardSettings;
use crate::types::BoardState;
use crate::types::FeedTopic;
use crate::types::FreezeEvent;
use crate::types::LastCheckedPage;
use crate::types::ToggleEvent;
use crate::types::ToggleOutcome;

/// Atomically scriptable board storage with pub/sub.
#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Create the bitsets and counters if they are absent and write the freeze threshold.
    ///
    /// Safe to call from every process sharing the store.
    async fn initialize(&self, settings: &BoardSettings) -> Result<()>;

    /// Run the toggle transaction for `index` against `cap`.
    ///
    /// The whole read-decide-write sequence is atomic; on error nothing was applied.
    async fn apply_toggle(&self, index: u64, cap: u64) -> Result<ToggleOutcome>;

    /// Read both bitsets and both counters.
    async fn board_state(&self) -> Result<BoardState>;

    /// Live freeze threshold, `None` when unset.
    async fn freeze_threshold(&self) -> Result<Option<u64>>;

    /// Replace the live freeze threshold.
    async fn set_freeze_threshold(&self, threshold_ms: u64) -> Result<()>;

    /// Current time according to the store.
    async fn server_time_ms(&self) -> Result<u64>;

    /// Page through last-checked timestamps, starting at `cursor` (0 for the first page).
    async fn scan_last_checked(&self, cursor: u64, page_size: usize) -> Result<LastCheckedPage>;

    /// Freeze `index` if it is checked, not frozen, and was last checked before `cutoff_ms`.
    ///
    /// Returns true when this call froze the cell.
    async fn freeze_if_stale(&self, index: u64, cutoff_ms: u64) -> Result<bool>;

    /// Reset both counters to the population counts of their bitsets.
    ///
    /// Returns the new `(toggle_count, frozen_count)`.
    async fn reconcile_counters(&self) -> Result<(u64, u64)>;

    /// Overwrite the toggle counter.
    async fn set_toggle_count(&self, value: u64) -> Result<()>;

    /// Append entries to the list for `day`, then keep only its first `max_len` entries.
    ///
    /// Returns the list length after the append and before trimming.
    async fn append_audit(&self, day: NaiveDate, entries: &[String], max_len: u64) -> Result<u64>;

    /// Entries `start..=stop` of the list for `day` (negative indices count from the end).
    async fn read_audit(&self, day: NaiveDate, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Days that currently have an audit list.
    async fn audit_days(&self) -> Result<Vec<NaiveDate>>;

    /// Delete the list for `day`; true if it existed.
    async fn delete_audit_day(&self, day: NaiveDate) -> Result<bool>;

    /// Publish a raw payload on the change feed.
    async fn publish(&self, topic: FeedTopic, payload: String) -> Result<()>;

    /// Subscribe to a change feed topic.
    async fn subscribe(&self, topic: FeedTopic) -> Result<FeedSubscription>;

    /// Announce a checkbox flip.
    async fn publish_toggle(&self, event: &ToggleEvent) -> Result<()> {
        let payload = encode(FeedTopic::Toggles, event)?;
        self.publish(FeedTopic::Toggles, payload).await
    }

    /// Announce a newly frozen cell.
    async fn publish_freeze(&self, event: &FreezeEvent) -> Result<()> {
        let payload = encode(FeedTopic::Freezes, event)?;
        self.publish(FeedTopic::Freezes, payload).await
    }
}

fn encode<T: Serialize>(topic: FeedTopic, event: &T) -> Result<String> {
    serde_json::to_string(event).map_err(|source| StoreError::Serialization {
        topic: topic.to_string(),
        source,
    })
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: BoardStore + ?Sized> BoardStore for std::sync::Arc<T> {
    async fn initialize(&self, settings: &BoardSettings) -> Result<()> {
        (**self).initialize(settings).await
    }

    async fn apply_toggle(&self, index: u64, cap: u64) -> Result<ToggleOutcome> {
        (**self).apply_toggle(index, cap).await
    }

    async fn board_state(&self) -> Result<BoardState> {
        (**self).board_state().await
    }

    async fn freeze_threshold(&self) -> Result<Option<u64>> {
        (**self).freeze_threshold().await
    }

    async fn set_freeze_threshold(&self, threshold_ms: u64) -> Result<()> {
        (**self).set_freeze_threshold(threshold_ms).await
    }

    async fn server_time_ms(&self) -> Result<u64> {
        (**self).server_time_ms().await
    }

    async fn scan_last_checked(&self, cursor: u64, page_size: usize) -> Result<LastCheckedPage> {
        (**self).scan_last_checked(cursor, page_size).await
    }

    async fn freeze_if_stale(&self, index: u64, cutoff_ms: u64) -> Result<bool> {
        (**self).freeze_if_stale(index, cutoff_ms).await
    }

    async fn reconcile_counters(&self) -> Result<(u64, u64)> {
        (**self).reconcile_counters().await
    }

    async fn set_toggle_count(&self, value: u64) -> Result<()> {
        (**self).set_toggle_count(value).await
    }

    async fn append_audit(&self, day: NaiveDate, entries: &[String], max_len: u64) -> Result<u64> {
        (**self).append_audit(day, entries, max_len).await
    }

    async fn read_audit(&self, day: NaiveDate, start: i64, stop: i64) -> Result<Vec<String>> {
        (**self).read_audit(day, start, stop).await
    }

    async fn audit_days(&self) -> Result<Vec<NaiveDate>> {
        (**self).audit_days().await
    }

    async fn delete_audit_day(&self, day: NaiveDate) -> Result<bool> {
        (**self).delete_audit_day(day).await
    }

    async fn publish(&self, topic: FeedTopic, payload: String) -> Result<()> {
        (**self).publish(topic, payload).await
    }

    async fn subscribe(&self, topic: FeedTopic) -> Result<FeedSubscription> {
        (**self).subscribe(topic).await
    }
}
