//! Periodic full-state broadcast.
//!
//! Viewers that missed incremental batches converge again at the next
//! snapshot, so staleness is bounded by the snapshot interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use toggleboard_core::BoardSnapshot;
use toggleboard_core::BoardStore;
use toggleboard_core::StoreError;
use toggleboard_core::TimeProvider;

use crate::hub::BoardEvent;
use crate::hub::ViewerHub;

/// Read the board and encode it as a snapshot stamped with `clock`'s time.
pub async fn capture_snapshot(store: &dyn BoardStore, clock: &dyn TimeProvider) -> Result<BoardSnapshot, StoreError> {
    let state = store.board_state().await?;
    Ok(BoardSnapshot::from_state(&state, clock.now_unix_ms()))
}

/// Broadcasts a snapshot to non-excluded viewers every interval.
pub struct SnapshotPublisher {
    store: Arc<dyn BoardStore>,
    hub: Arc<ViewerHub>,
    clock: Arc<dyn TimeProvider>,
    interval: Duration,
}

impl SnapshotPublisher {
    /// Publisher reading from `store` every `interval`.
    pub fn new(store: Arc<dyn BoardStore>, hub: Arc<ViewerHub>, clock: Arc<dyn TimeProvider>, interval: Duration) -> Self {
        Self {
            store,
            hub,
            clock,
            interval,
        }
    }

    /// Capture and broadcast one snapshot, returning how many viewers it reached.
    pub async fn publish_once(&self) -> Result<usize, StoreError> {
        let snapshot = capture_snapshot(self.store.as_ref(), self.clock.as_ref()).await?;
        let count = snapshot.count;
        let reached = self.hub.broadcast(&BoardEvent::FullState(snapshot));
        debug!(count, reached, "snapshot broadcast");
        Ok(reached)
    }

    /// Run until cancelled. Store failures skip one round.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), String> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        info!(interval_ms = self.interval.as_millis() as u64, "snapshot publisher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(err) = self.publish_once().await {
                        warn!(error = %err, "snapshot skipped");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use toggleboard_core::BoardSettings;
    use toggleboard_core::InMemoryBoardStore;
    use toggleboard_core::InitialCount;
    use toggleboard_core::SimulatedTimeProvider;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn publishes_every_interval_to_included_viewers() {
        let clock = SimulatedTimeProvider::new(42);
        let store = Arc::new(InMemoryBoardStore::with_clock(Arc::new(clock.clone())));
        store
            .initialize(&BoardSettings {
                total_cells: 16,
                global_cap: 16,
                freeze_threshold_ms: 1000,
                initial_count: InitialCount::Zero,
            })
            .await
            .unwrap();
        store.apply_toggle(0, 16).await.unwrap();

        let hub = Arc::new(ViewerHub::new(8));
        let mut included = hub.join(false);
        let excluded = hub.join(true);
        let publisher = SnapshotPublisher::new(store, hub.clone(), Arc::new(clock), Duration::from_secs(50));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { publisher.run(cancel).await }
        });

        let frame = tokio::time::timeout(Duration::from_secs(51), included.recv()).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "full_state");
        assert_eq!(value["data"]["full_state"], "gAA");
        assert_eq!(value["data"]["count"], 1);
        assert_eq!(value["data"]["timestamp"], 42);
        assert!(!excluded.receives_snapshots());

        cancel.cancel();
        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn uninitialized_store_is_an_error() {
        let publisher = SnapshotPublisher::new(
            Arc::new(InMemoryBoardStore::new()),
            Arc::new(ViewerHub::new(1)),
            Arc::new(SimulatedTimeProvider::new(0)),
            Duration::from_secs(1),
        );
        assert!(publisher.publish_once().await.is_err());
    }
}
