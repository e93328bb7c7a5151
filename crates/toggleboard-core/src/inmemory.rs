//! In-process board store.
//!
//! Used when no Redis URL is configured and as the deterministic backend in
//! tests. All board state sits behind one mutex, which gives every operation
//! the same all-or-nothing, serialized semantics the Redis scripts have. The
//! feed is a set of bounded in-process channels per topic; a subscriber that
//! falls behind loses messages, as with Redis pub/sub.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::bitset::Bitset;
use crate::constants::FEED_SUBSCRIPTION_CAPACITY;
use crate::error::Result;
use crate::error::StoreError;
use crate::feed::FeedSubscription;
use crate::pure::sweep_eligible;
use crate::pure::toggle::ToggleRead;
use crate::pure::toggle::Transition;
use crate::pure::toggle::next_transition;
use crate::time::SystemTimeProvider;
use crate::time::TimeProvider;
use crate::traits::BoardStore;
use crate::types::BoardSettings;
use crate::types::BoardState;
use crate::types::FeedTopic;
use crate::types::LastCheckedPage;
use crate::types::ToggleOutcome;

#[derive(Debug, Default)]
struct BoardData {
    initialized: bool,
    bits: Option<Bitset>,
    frozen: Option<Bitset>,
    count: u64,
    frozen_count: u64,
    last_checked: BTreeMap<u64, u64>,
    freeze_threshold_ms: Option<u64>,
    audit: BTreeMap<NaiveDate, Vec<String>>,
}

impl BoardData {
    fn bitsets_mut(&mut self, index: u64) -> Result<(&mut Bitset, &mut Bitset)> {
        match (self.bits.as_mut(), self.frozen.as_mut()) {
            (Some(bits), Some(frozen)) if index < bits.len() => Ok((bits, frozen)),
            (Some(bits), Some(_)) => Err(StoreError::Script {
                script: "toggle".to_string(),
                reason: format!("index {index} beyond board of {} cells", bits.len()),
            }),
            _ => Err(not_initialized()),
        }
    }
}

fn not_initialized() -> StoreError {
    StoreError::Unavailable {
        reason: "board not initialized".to_string(),
    }
}

/// Board store held entirely in process memory.
pub struct InMemoryBoardStore {
    data: Mutex<BoardData>,
    feeds: Mutex<HashMap<FeedTopic, Vec<mpsc::Sender<String>>>>,
    clock: Arc<dyn TimeProvider>,
}

impl InMemoryBoardStore {
    /// Store that reads time from the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemTimeProvider))
    }

    /// Store that reads time from `clock`; tests pass a simulated clock.
    pub fn with_clock(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            data: Mutex::new(BoardData::default()),
            feeds: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Current last-checked timestamp of `index`, for assertions.
    pub fn last_checked(&self, index: u64) -> Option<u64> {
        self.data.lock().last_checked.get(&index).copied()
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: FeedTopic) -> usize {
        self.feeds.lock().get(&topic).map(|senders| senders.iter().filter(|s| !s.is_closed()).count()).unwrap_or(0)
    }
}

impl Default for InMemoryBoardStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BoardStore for InMemoryBoardStore {
    async fn initialize(&self, settings: &BoardSettings) -> Result<()> {
        let mut data = self.data.lock();
        if data.bits.is_none() {
            data.bits = Some(Bitset::new(settings.total_cells));
        }
        if data.frozen.is_none() {
            data.frozen = Some(Bitset::new(settings.total_cells));
        }
        if !data.initialized {
            data.count = settings.initial_count_value();
            data.frozen_count = 0;
            data.initialized = true;
        }
        data.freeze_threshold_ms = Some(settings.freeze_threshold_ms);
        Ok(())
    }

    async fn apply_toggle(&self, index: u64, cap: u64) -> Result<ToggleOutcome> {
        let now_ms = self.clock.now_unix_ms();
        let mut data = self.data.lock();
        let last_checked_ms = data.last_checked.get(&index).copied();
        let count = data.count;
        let freeze_threshold_ms = data.freeze_threshold_ms;
        let (bits, frozen) = data.bitsets_mut(index)?;

        let read = ToggleRead {
            bit: bits.get(index),
            frozen: frozen.get(index),
            last_checked_ms,
            count,
            freeze_threshold_ms,
            now_ms,
        };
        let transition = next_transition(&read, cap);
        match transition {
            Transition::AlreadyFrozen | Transition::CapReached => {}
            Transition::Check { at_ms } => {
                bits.set(index, true);
                data.count = data.count.saturating_add(1);
                data.last_checked.insert(index, at_ms);
            }
            Transition::Uncheck => {
                bits.set(index, false);
                data.count = data.count.saturating_sub(1);
                data.last_checked.remove(&index);
            }
            Transition::Freeze => {
                frozen.set(index, true);
                data.frozen_count = data.frozen_count.saturating_add(1);
                data.last_checked.remove(&index);
            }
        }
        Ok(transition.outcome(read.bit))
    }

    async fn board_state(&self) -> Result<BoardState> {
        let data = self.data.lock();
        match (&data.bits, &data.frozen) {
            (Some(bits), Some(frozen)) => Ok(BoardState {
                bits: bits.as_bytes().to_vec(),
                frozen: frozen.as_bytes().to_vec(),
                count: data.count,
                frozen_count: data.frozen_count,
            }),
            _ => Err(not_initialized()),
        }
    }

    async fn freeze_threshold(&self) -> Result<Option<u64>> {
        Ok(self.data.lock().freeze_threshold_ms)
    }

    async fn set_freeze_threshold(&self, threshold_ms: u64) -> Result<()> {
        self.data.lock().freeze_threshold_ms = Some(threshold_ms);
        Ok(())
    }

    async fn server_time_ms(&self) -> Result<u64> {
        Ok(self.clock.now_unix_ms())
    }

    async fn scan_last_checked(&self, cursor: u64, page_size: usize) -> Result<LastCheckedPage> {
        let data = self.data.lock();
        let mut entries = Vec::with_capacity(page_size.min(data.last_checked.len()));
        let mut next_cursor = 0;
        for (&index, &at) in data.last_checked.range(cursor..) {
            if entries.len() >= page_size.max(1) {
                next_cursor = index;
                break;
            }
            entries.push((index, at));
        }
        Ok(LastCheckedPage { next_cursor, entries })
    }

    async fn freeze_if_stale(&self, index: u64, cutoff_ms: u64) -> Result<bool> {
        let mut data = self.data.lock();
        let Some(checked_at) = data.last_checked.get(&index).copied() else {
            return Ok(false);
        };
        let (bits, frozen) = data.bitsets_mut(index)?;
        if !bits.get(index) || frozen.get(index) || !sweep_eligible(checked_at, cutoff_ms) {
            return Ok(false);
        }
        frozen.set(index, true);
        data.frozen_count = data.frozen_count.saturating_add(1);
        data.last_checked.remove(&index);
        Ok(true)
    }

    async fn reconcile_counters(&self) -> Result<(u64, u64)> {
        let mut data = self.data.lock();
        let (count, frozen_count) = match (&data.bits, &data.frozen) {
            (Some(bits), Some(frozen)) => (bits.count_ones(), frozen.count_ones()),
            _ => return Err(not_initialized()),
        };
        data.count = count;
        data.frozen_count = frozen_count;
        Ok((count, frozen_count))
    }

    async fn set_toggle_count(&self, value: u64) -> Result<()> {
        self.data.lock().count = value;
        Ok(())
    }

    async fn append_audit(&self, day: NaiveDate, entries: &[String], max_len: u64) -> Result<u64> {
        let mut data = self.data.lock();
        let list = data.audit.entry(day).or_default();
        list.extend_from_slice(entries);
        let length = list.len() as u64;
        list.truncate(usize::try_from(max_len).unwrap_or(usize::MAX));
        Ok(length)
    }

    async fn read_audit(&self, day: NaiveDate, start: i64, stop: i64) -> Result<Vec<String>> {
        let data = self.data.lock();
        let Some(list) = data.audit.get(&day) else {
            return Ok(Vec::new());
        };
        Ok(match list_range(list.len(), start, stop) {
            Some((from, to)) => list[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn audit_days(&self) -> Result<Vec<NaiveDate>> {
        Ok(self.data.lock().audit.keys().copied().collect())
    }

    async fn delete_audit_day(&self, day: NaiveDate) -> Result<bool> {
        Ok(self.data.lock().audit.remove(&day).is_some())
    }

    async fn publish(&self, topic: FeedTopic, payload: String) -> Result<()> {
        let mut feeds = self.feeds.lock();
        if let Some(senders) = feeds.get_mut(&topic) {
            senders.retain(|sender| match sender.try_send(payload.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!(%topic, "feed subscriber full, dropping message");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
        }
        Ok(())
    }

    async fn subscribe(&self, topic: FeedTopic) -> Result<FeedSubscription> {
        let (sender, subscription) = FeedSubscription::channel(topic, FEED_SUBSCRIPTION_CAPACITY);
        self.feeds.lock().entry(topic).or_default().push(sender);
        Ok(subscription)
    }
}

/// Resolve an inclusive `start..=stop` range with negative-from-end indices.
fn list_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let resolve = |i: i64| if i < 0 { len + i } else { i };
    let from = resolve(start).max(0);
    let to = resolve(stop).min(len - 1);
    if len == 0 || from > to {
        return None;
    }
    Some((from as usize, to as usize))
}
