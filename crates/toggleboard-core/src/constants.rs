//! Board-wide constants and default tunables.
//!
//! Every value here is a default; the node configuration can override all of
//! them except the store key names, which are part of the persisted layout.

// ============================================================================
// Board Shape
// ============================================================================

/// Default number of cells on the board.
pub const DEFAULT_TOTAL_CELLS: u64 = 1_000_000;

/// Default ceiling on the toggle counter.
pub const DEFAULT_GLOBAL_CAP: u64 = 1_000_000;

/// Default time a cell must stay checked before an uncheck attempt freezes it (1 hour).
pub const DEFAULT_FREEZE_THRESHOLD_MS: u64 = 3_600_000;

/// Upper bound on the board size (2^32 bits, the Redis string bit offset limit).
///
/// Bounds the bitset allocation for both backends.
pub const MAX_TOTAL_CELLS: u64 = 1 << 32;

// ============================================================================
// Store Keys
// ============================================================================

/// Key of the checkbox bitset.
pub const CHECKBOX_BITSET_KEY: &str = "truncated_bitset";

/// Key of the toggle counter (popcount of the checkbox bitset).
pub const TOGGLE_COUNT_KEY: &str = "count";

/// Key of the frozen bitset.
pub const FROZEN_BITSET_KEY: &str = "frozen_bitset";

/// Key of the frozen counter (popcount of the frozen bitset).
pub const FROZEN_COUNT_KEY: &str = "frozen_count";

/// Hash of index to the Unix ms at which the cell was last checked.
pub const LAST_CHECKED_KEY: &str = "last_checked";

/// Key holding the live freeze threshold in milliseconds.
pub const FREEZE_THRESHOLD_KEY: &str = "freeze_time_ms";

/// Prefix of the daily audit log lists (`checkbox_logs:YYYY-MM-DD`).
pub const AUDIT_LOG_KEY_PREFIX: &str = "checkbox_logs:";

// ============================================================================
// Change Feed
// ============================================================================

/// Feed topic carrying `[index, newBit, timestampMs]` toggle events.
pub const TOGGLE_FEED_TOPIC: &str = "bit_toggle_channel";

/// Feed topic carrying `[index, timestampMs]` freeze events.
pub const FREEZE_FEED_TOPIC: &str = "frozen_bit_channel";

/// Buffer of a single in-process feed subscription.
///
/// Subscribers that fall further behind lose the newest messages; the
/// snapshot publisher repairs the gap.
pub const FEED_SUBSCRIPTION_CAPACITY: usize = 4096;

// ============================================================================
// Admission Defaults
// ============================================================================

/// Score below which a client key is always admitted.
pub const DEFAULT_ABUSE_MAX_ALLOWED: u64 = 1000;

/// Score units per halving of the pass probability above the threshold.
pub const DEFAULT_ABUSE_UNIT_SIZE: u64 = 2500;

/// Interval between abuse score decay cycles (1 minute).
pub const DEFAULT_ABUSE_DECAY_INTERVAL_MS: u64 = 60_000;

/// Decay cycles subtract `max_allowed * mercy_ratio` from every score.
pub const DEFAULT_ABUSE_MERCY_RATIO: u64 = 8;

// ============================================================================
// Audit Log Defaults
// ============================================================================

/// Entries buffered before an audit flush is forced.
pub const DEFAULT_AUDIT_BATCH_SIZE: usize = 200;

/// Maximum time between audit flushes.
pub const DEFAULT_AUDIT_FLUSH_INTERVAL_MS: u64 = 5000;

/// Capacity of the bounded queue feeding the audit batcher.
pub const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 20;

/// Cap on the length of one daily audit list.
pub const DEFAULT_MAX_AUDIT_ENTRIES_PER_DAY: u64 = 400_000_000;

/// Days of audit lists kept by the retention job.
pub const DEFAULT_AUDIT_RETENTION_DAYS: u32 = 30;

// ============================================================================
// Fan-out Defaults
// ============================================================================

/// Maximum entries in one emitted fan-out batch.
pub const DEFAULT_FANOUT_BATCH_SIZE: usize = 400;

/// Fan-out flush timer period.
pub const DEFAULT_FANOUT_INTERVAL_MS: u64 = 100;

/// Period of the full-state snapshot broadcast.
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 50_000;

/// Frames buffered per viewer before a slow viewer starts skipping.
pub const DEFAULT_HUB_CAPACITY: usize = 256;

// ============================================================================
// Freeze Sweeper
// ============================================================================

/// Sweeper safety margin, as a divisor of the freeze threshold (10%).
pub const SWEEP_SAFETY_MARGIN_DIVISOR: u64 = 10;

/// Default page size when scanning last-checked timestamps.
pub const DEFAULT_SWEEP_PAGE_SIZE: usize = 1000;
