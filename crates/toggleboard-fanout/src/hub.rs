//! Viewer broadcast groups.
//!
//! Every connected viewer receives incremental batches. Full-state snapshots go
//! only to viewers that have not been excluded (IPv6-grouped connections and
//! connections that asked to unsubscribe). Each event is serialized once into
//! a shared frame and handed to all receivers.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use tracing::warn;

use toggleboard_core::BoardSnapshot;

use crate::batch::FreezeBatch;
use crate::batch::ToggleBatch;

/// A serialized `{"event": ..., "data": ...}` frame.
pub type Frame = Arc<str>;

/// Events pushed to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BoardEvent {
    /// Full board state.
    FullState(BoardSnapshot),
    /// `[onIndices, offIndices, maxTimestampMs]`.
    BatchedBitToggles(ToggleBatch),
    /// `[frozenIndices, maxTimestampMs]`.
    BatchedFrozenBits(FreezeBatch),
}

impl BoardEvent {
    /// Wire event name.
    pub fn name(&self) -> &'static str {
        match self {
            BoardEvent::FullState(_) => "full_state",
            BoardEvent::BatchedBitToggles(_) => "batched_bit_toggles",
            BoardEvent::BatchedFrozenBits(_) => "batched_frozen_bits",
        }
    }

    /// Serialize into a frame.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// Viewers a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audience {
    /// Every connected viewer.
    Everyone,
    /// Viewers that still receive full-state snapshots.
    SnapshotGroup,
}

#[derive(Debug, Clone)]
struct Delivery {
    frame: Frame,
    audience: Audience,
}

#[derive(Debug, Default)]
struct ViewerCounts {
    connected: AtomicUsize,
    snapshot_group: AtomicUsize,
}

/// Broadcast groups for all viewers of one process.
///
/// All frames travel on one channel, so every viewer sees them in broadcast
/// order; snapshot-excluded viewers skip snapshot frames on receipt.
#[derive(Debug)]
pub struct ViewerHub {
    sender: broadcast::Sender<Delivery>,
    counts: Arc<ViewerCounts>,
}

impl ViewerHub {
    /// Hub buffering up to `capacity` frames per viewer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            counts: Arc::new(ViewerCounts::default()),
        }
    }

    /// Register a viewer. IPv6-grouped viewers start excluded from snapshots.
    pub fn join(&self, is_ipv6: bool) -> ViewerSubscription {
        self.counts.connected.fetch_add(1, Ordering::AcqRel);
        self.counts.snapshot_group.fetch_add(1, Ordering::AcqRel);
        let mut subscription = ViewerSubscription {
            receiver: self.sender.subscribe(),
            receives_snapshots: true,
            counts: Arc::clone(&self.counts),
        };
        if is_ipv6 {
            subscription.exclude_from_snapshots();
        }
        subscription
    }

    /// Send `event` to its audience, returning how many viewers it reached.
    ///
    /// Snapshots skip excluded viewers; batches reach everyone.
    pub fn broadcast(&self, event: &BoardEvent) -> usize {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = event.name(), error = %err, "failed to serialize board event");
                return 0;
            }
        };
        let audience = match event {
            BoardEvent::FullState(_) => Audience::SnapshotGroup,
            _ => Audience::Everyone,
        };
        if audience == Audience::SnapshotGroup && self.counts.snapshot_group.load(Ordering::Acquire) == 0 {
            return 0;
        }
        match self.sender.send(Delivery { frame, audience }) {
            Ok(receivers) => match audience {
                Audience::Everyone => receivers,
                Audience::SnapshotGroup => self.counts.snapshot_group.load(Ordering::Acquire).min(receivers),
            },
            Err(_) => 0,
        }
    }

    /// Currently connected viewers.
    pub fn viewer_count(&self) -> usize {
        self.counts.connected.load(Ordering::Acquire)
    }
}

/// One viewer's view of the hub. Dropping it leaves every group.
#[derive(Debug)]
pub struct ViewerSubscription {
    receiver: broadcast::Receiver<Delivery>,
    receives_snapshots: bool,
    counts: Arc<ViewerCounts>,
}

impl ViewerSubscription {
    /// Stop receiving full-state snapshots.
    pub fn exclude_from_snapshots(&mut self) {
        if self.receives_snapshots {
            self.receives_snapshots = false;
            self.counts.snapshot_group.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// True while snapshots are delivered to this viewer.
    pub fn receives_snapshots(&self) -> bool {
        self.receives_snapshots
    }

    /// Next frame for this viewer, `None` once the hub is gone.
    ///
    /// A viewer that falls more than the hub capacity behind skips the frames
    /// it missed.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.receiver.recv().await {
                Ok(Delivery {
                    audience: Audience::SnapshotGroup,
                    ..
                }) if !self.receives_snapshots => {}
                Ok(delivery) => return Some(delivery.frame),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "viewer lagging, frames skipped"),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for ViewerSubscription {
    fn drop(&mut self) {
        self.exclude_from_snapshots();
        self.counts.connected.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> BoardEvent {
        BoardEvent::FullState(BoardSnapshot {
            full_state: "gA".to_string(),
            frozen_state: "AA".to_string(),
            count: 1,
            frozen_count: 0,
            timestamp: 5,
        })
    }

    fn toggles() -> BoardEvent {
        BoardEvent::BatchedBitToggles(ToggleBatch {
            on: vec![1],
            off: vec![2],
            max_timestamp_ms: 9,
        })
    }

    #[test]
    fn frames_are_tagged_by_event_name() {
        let frame = toggles().to_frame().unwrap();
        assert_eq!(&*frame, r#"{"event":"batched_bit_toggles","data":[[1],[2],9]}"#);

        let value: serde_json::Value = serde_json::from_str(&snapshot().to_frame().unwrap()).unwrap();
        assert_eq!(value["event"], "full_state");
        assert_eq!(value["data"]["count"], 1);
    }

    #[tokio::test]
    async fn ipv6_viewers_miss_snapshots_only() {
        let hub = ViewerHub::new(8);
        let mut v4 = hub.join(false);
        let mut v6 = hub.join(true);
        assert!(!v6.receives_snapshots());

        assert_eq!(hub.broadcast(&snapshot()), 1);
        assert_eq!(hub.broadcast(&toggles()), 2);

        assert!(v4.recv().await.unwrap().contains("full_state"));
        assert!(v4.recv().await.unwrap().contains("batched_bit_toggles"));
        assert!(v6.recv().await.unwrap().contains("batched_bit_toggles"));
    }

    #[tokio::test]
    async fn frames_arrive_in_broadcast_order() {
        let hub = ViewerHub::new(8);
        let mut viewer = hub.join(false);
        for _ in 0..100 {
            hub.broadcast(&snapshot());
            hub.broadcast(&toggles());
            assert!(viewer.recv().await.unwrap().contains("full_state"));
            assert!(viewer.recv().await.unwrap().contains("batched_bit_toggles"));
        }
    }

    #[tokio::test]
    async fn excluded_viewer_skips_interleaved_snapshots() {
        let hub = ViewerHub::new(8);
        let _watcher = hub.join(false);
        let mut viewer = hub.join(true);
        assert_eq!(hub.broadcast(&snapshot()), 1);
        hub.broadcast(&toggles());
        assert_eq!(hub.broadcast(&snapshot()), 1);
        hub.broadcast(&BoardEvent::BatchedFrozenBits(FreezeBatch {
            frozen: vec![4],
            max_timestamp_ms: 10,
        }));
        assert!(viewer.recv().await.unwrap().contains("batched_bit_toggles"));
        assert!(viewer.recv().await.unwrap().contains("batched_frozen_bits"));
    }

    #[tokio::test]
    async fn unsubscribe_leaves_snapshot_group() {
        let hub = ViewerHub::new(8);
        let mut viewer = hub.join(false);
        viewer.exclude_from_snapshots();
        assert_eq!(hub.broadcast(&snapshot()), 0);
        hub.broadcast(&toggles());
        assert!(viewer.recv().await.unwrap().contains("batched_bit_toggles"));
    }

    #[test]
    fn viewer_count_tracks_subscriptions() {
        let hub = ViewerHub::new(8);
        let a = hub.join(false);
        let b = hub.join(true);
        assert_eq!(hub.viewer_count(), 2);
        drop(a);
        assert_eq!(hub.viewer_count(), 1);
        drop(b);
        assert_eq!(hub.viewer_count(), 0);
    }

    #[tokio::test]
    async fn lagging_viewer_skips_to_newest() {
        let hub = ViewerHub::new(2);
        let mut viewer = hub.join(true);
        for ts in 0..5 {
            hub.broadcast(&BoardEvent::BatchedFrozenBits(FreezeBatch {
                frozen: vec![ts],
                max_timestamp_ms: ts,
            }));
        }
        let frame = viewer.recv().await.unwrap();
        assert_eq!(&*frame, r#"{"event":"batched_frozen_bits","data":[[3],3]}"#);
    }

    #[tokio::test]
    async fn recv_ends_when_hub_dropped() {
        let hub = ViewerHub::new(2);
        let mut viewer = hub.join(false);
        drop(hub);
        assert!(viewer.recv().await.is_none());
    }
}
