//! Coalescing buffers for the fan-out pipelines.
//!
//! A pending batch keeps only the latest state per index, so flickers inside
//! one batch window are never replayed individually, and tracks the maximum
//! timestamp it has seen.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Serialize;
use serde::Serializer;
use serde::de::DeserializeOwned;

use toggleboard_core::FeedTopic;
use toggleboard_core::FreezeEvent;
use toggleboard_core::ToggleEvent;

use crate::hub::BoardEvent;

/// Emitted toggle batch, serialized as `[on, off, maxTimestampMs]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToggleBatch {
    /// Indices whose latest state is checked, ascending.
    pub on: Vec<u64>,
    /// Indices whose latest state is unchecked, ascending.
    pub off: Vec<u64>,
    /// Largest event timestamp in the batch.
    pub max_timestamp_ms: u64,
}

impl Serialize for ToggleBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.on, &self.off, self.max_timestamp_ms).serialize(serializer)
    }
}

/// Emitted freeze batch, serialized as `[frozen, maxTimestampMs]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreezeBatch {
    /// Newly frozen indices in arrival order.
    pub frozen: Vec<u64>,
    /// Largest event timestamp in the batch.
    pub max_timestamp_ms: u64,
}

impl Serialize for FreezeBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.frozen, self.max_timestamp_ms).serialize(serializer)
    }
}

/// A pending batch fed from one feed topic.
pub trait Coalescer: Default + Send + 'static {
    /// Decoded feed event.
    type Event: DeserializeOwned + Send;

    /// Feed topic this batch consumes.
    const TOPIC: FeedTopic;

    /// Fold one event in.
    fn push(&mut self, event: Self::Event);

    /// Distinct indices pending.
    fn len(&self) -> usize;

    /// True when nothing is pending.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain into the viewer event and reset to empty.
    fn take(&mut self) -> BoardEvent;
}

/// Latest bit per index since the last flush.
#[derive(Debug, Default)]
pub struct PendingToggles {
    switches: BTreeMap<u64, bool>,
    max_timestamp_ms: u64,
}

impl Coalescer for PendingToggles {
    type Event = ToggleEvent;

    const TOPIC: FeedTopic = FeedTopic::Toggles;

    fn push(&mut self, event: ToggleEvent) {
        self.switches.insert(event.index, event.bit);
        self.max_timestamp_ms = self.max_timestamp_ms.max(event.timestamp_ms);
    }

    fn len(&self) -> usize {
        self.switches.len()
    }

    fn take(&mut self) -> BoardEvent {
        let mut batch = ToggleBatch {
            max_timestamp_ms: self.max_timestamp_ms,
            ..ToggleBatch::default()
        };
        for (index, bit) in std::mem::take(&mut self.switches) {
            if bit {
                batch.on.push(index);
            } else {
                batch.off.push(index);
            }
        }
        self.max_timestamp_ms = 0;
        BoardEvent::BatchedBitToggles(batch)
    }
}

/// Newly frozen indices since the last flush.
#[derive(Debug, Default)]
pub struct PendingFreezes {
    frozen: Vec<u64>,
    seen: BTreeSet<u64>,
    max_timestamp_ms: u64,
}

impl Coalescer for PendingFreezes {
    type Event = FreezeEvent;

    const TOPIC: FeedTopic = FeedTopic::Freezes;

    fn push(&mut self, event: FreezeEvent) {
        if self.seen.insert(event.index) {
            self.frozen.push(event.index);
        }
        self.max_timestamp_ms = self.max_timestamp_ms.max(event.timestamp_ms);
    }

    fn len(&self) -> usize {
        self.frozen.len()
    }

    fn take(&mut self) -> BoardEvent {
        self.seen.clear();
        let batch = FreezeBatch {
            frozen: std::mem::take(&mut self.frozen),
            max_timestamp_ms: std::mem::take(&mut self.max_timestamp_ms),
        };
        BoardEvent::BatchedFrozenBits(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toggle(index: u64, bit: bool, timestamp_ms: u64) -> ToggleEvent {
        ToggleEvent {
            index,
            bit,
            timestamp_ms,
        }
    }

    #[test]
    fn last_write_wins_per_index() {
        let mut pending = PendingToggles::default();
        pending.push(toggle(5, true, 10));
        pending.push(toggle(5, false, 12));
        pending.push(toggle(5, true, 11));
        pending.push(toggle(3, false, 9));
        assert_eq!(pending.len(), 2);

        let BoardEvent::BatchedBitToggles(batch) = pending.take() else {
            panic!("expected toggle batch");
        };
        assert_eq!(batch, ToggleBatch {
            on: vec![5],
            off: vec![3],
            max_timestamp_ms: 12
        });
        assert!(pending.is_empty());
    }

    #[test]
    fn take_resets_timestamp() {
        let mut pending = PendingToggles::default();
        pending.push(toggle(1, true, 100));
        pending.take();
        pending.push(toggle(2, true, 5));
        let BoardEvent::BatchedBitToggles(batch) = pending.take() else {
            panic!("expected toggle batch");
        };
        assert_eq!(batch.max_timestamp_ms, 5);
    }

    #[test]
    fn freezes_keep_arrival_order_without_duplicates() {
        let mut pending = PendingFreezes::default();
        for (index, ts) in [(9, 1), (4, 3), (9, 2)] {
            pending.push(FreezeEvent {
                index,
                timestamp_ms: ts,
            });
        }
        assert_eq!(pending.len(), 2);
        let BoardEvent::BatchedFrozenBits(batch) = pending.take() else {
            panic!("expected freeze batch");
        };
        assert_eq!(batch.frozen, vec![9, 4]);
        assert_eq!(batch.max_timestamp_ms, 3);
        assert!(pending.is_empty());
    }

    #[test]
    fn batches_serialize_as_arrays() {
        let batch = FreezeBatch {
            frozen: vec![1, 2],
            max_timestamp_ms: 7,
        };
        assert_eq!(serde_json::to_string(&batch).unwrap(), "[[1,2],7]");
    }
}
