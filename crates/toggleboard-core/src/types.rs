//! Board domain types and wire payloads.

use serde::Deserialize;
use serde::Serialize;

use crate::bitset::encode_bits;
use crate::constants::FREEZE_FEED_TOPIC;
use crate::constants::TOGGLE_FEED_TOPIC;

// ============================================================================
// Toggle Results
// ============================================================================

/// Result of one atomic toggle transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOutcome {
    /// Checkbox bit at the index after the transaction.
    pub bit: bool,
    /// Change applied to the toggle counter: -1, 0 or 1.
    pub delta: i64,
    /// True when this transaction froze the cell.
    pub frozen: bool,
}

impl ToggleOutcome {
    /// Outcome of a transaction that changed nothing.
    pub fn unchanged(bit: bool) -> Self {
        Self {
            bit,
            delta: 0,
            frozen: false,
        }
    }

    /// Outcome of a lazy freeze: the cell stays checked and becomes immutable.
    pub fn freeze() -> Self {
        Self {
            bit: true,
            delta: 0,
            frozen: true,
        }
    }

    /// True when the checkbox bit flipped.
    pub fn changed(&self) -> bool {
        self.delta != 0
    }
}

/// How the toggle counter is seeded when the board is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InitialCount {
    /// Seed the counter at the global cap. The cap guard is then true from the
    /// first operation and the board is read-only until the counter is lowered.
    #[default]
    Cap,
    /// Seed the counter at zero, matching the empty bitset.
    Zero,
}

/// Static parameters of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSettings {
    /// Number of cells (N).
    pub total_cells: u64,
    /// Ceiling on the toggle counter.
    pub global_cap: u64,
    /// Freeze threshold written to the store on initialization.
    pub freeze_threshold_ms: u64,
    /// Toggle counter seed.
    pub initial_count: InitialCount,
}

impl BoardSettings {
    /// Value written to the toggle counter when it does not exist yet.
    pub fn initial_count_value(&self) -> u64 {
        match self.initial_count {
            InitialCount::Cap => self.global_cap,
            InitialCount::Zero => 0,
        }
    }
}

// ============================================================================
// Change Feed
// ============================================================================

/// Topics of the shared change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedTopic {
    /// Checkbox bit flips.
    Toggles,
    /// Cells that became frozen.
    Freezes,
}

impl FeedTopic {
    /// Channel name in the backing store.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedTopic::Toggles => TOGGLE_FEED_TOPIC,
            FeedTopic::Freezes => FREEZE_FEED_TOPIC,
        }
    }
}

impl std::fmt::Display for FeedTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checkbox flip, encoded on the feed as `[index, newBit, timestampMs]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, u8, u64)", into = "(u64, u8, u64)")]
pub struct ToggleEvent {
    /// Cell index.
    pub index: u64,
    /// New checkbox bit.
    pub bit: bool,
    /// Unix ms at which the toggle was applied.
    pub timestamp_ms: u64,
}

impl From<(u64, u8, u64)> for ToggleEvent {
    fn from((index, bit, timestamp_ms): (u64, u8, u64)) -> Self {
        Self {
            index,
            bit: bit != 0,
            timestamp_ms,
        }
    }
}

impl From<ToggleEvent> for (u64, u8, u64) {
    fn from(event: ToggleEvent) -> Self {
        (event.index, u8::from(event.bit), event.timestamp_ms)
    }
}

/// A newly frozen cell, encoded on the feed as `[index, timestampMs]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, u64)", into = "(u64, u64)")]
pub struct FreezeEvent {
    /// Cell index.
    pub index: u64,
    /// Unix ms at which the freeze was applied.
    pub timestamp_ms: u64,
}

impl From<(u64, u64)> for FreezeEvent {
    fn from((index, timestamp_ms): (u64, u64)) -> Self {
        Self { index, timestamp_ms }
    }
}

impl From<FreezeEvent> for (u64, u64) {
    fn from(event: FreezeEvent) -> Self {
        (event.index, event.timestamp_ms)
    }
}

// ============================================================================
// Board State
// ============================================================================

/// Raw board contents read in one consistent step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardState {
    /// Checkbox bitset bytes in store layout.
    pub bits: Vec<u8>,
    /// Frozen bitset bytes in store layout.
    pub frozen: Vec<u8>,
    /// Toggle counter.
    pub count: u64,
    /// Frozen counter.
    pub frozen_count: u64,
}

/// Full-state payload served to new viewers and broadcast periodically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// Base64 checkbox bitset.
    pub full_state: String,
    /// Base64 frozen bitset.
    pub frozen_state: String,
    /// Toggle counter.
    pub count: u64,
    /// Frozen counter.
    pub frozen_count: u64,
    /// Unix ms at which the snapshot was taken.
    pub timestamp: u64,
}

impl BoardSnapshot {
    /// Encode a board state read at `now_ms`.
    pub fn from_state(state: &BoardState, now_ms: u64) -> Self {
        Self {
            full_state: encode_bits(&state.bits),
            frozen_state: encode_bits(&state.frozen),
            count: state.count,
            frozen_count: state.frozen_count,
            timestamp: now_ms,
        }
    }
}

/// One page of the last-checked timestamp index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastCheckedPage {
    /// Cursor for the next page; 0 when the scan is complete.
    pub next_cursor: u64,
    /// `(index, checked_at_ms)` pairs.
    pub entries: Vec<(u64, u64)>,
}

// ============================================================================
// Audit Records
// ============================================================================

/// What kind of mutation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTag {
    /// A checkbox flip.
    New,
    /// A lazy freeze.
    Frozen,
}

impl AuditTag {
    /// Tag text in the log entry.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditTag::New => "new",
            AuditTag::Frozen => "frozen",
        }
    }
}

/// An accepted mutation queued for the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Client key that caused the mutation.
    pub client_key: String,
    /// Cell index.
    pub index: u64,
    /// Checkbox bit after the mutation.
    pub state: bool,
    /// Mutation kind.
    pub tag: AuditTag,
    /// Unix ms at which the mutation was accepted.
    pub timestamp_ms: u64,
}
