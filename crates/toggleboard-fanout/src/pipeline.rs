//! Feed-to-viewer batching pipelines.
//!
//! A pipeline subscribes to one feed topic, folds events into a
//! [`Coalescer`], and flushes to the [`ViewerHub`] when the batch reaches its
//! size limit or the timer fires with something pending, whichever comes
//! first. The toggle and freeze pipelines are the same loop over different
//! coalescers.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use toggleboard_core::BoardStore;
use toggleboard_core::constants::DEFAULT_FANOUT_BATCH_SIZE;
use toggleboard_core::constants::DEFAULT_FANOUT_INTERVAL_MS;
use toggleboard_core::decode_feed_payload;

use crate::batch::Coalescer;
use crate::batch::PendingFreezes;
use crate::batch::PendingToggles;
use crate::hub::ViewerHub;

/// Flush triggers of one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Flush as soon as this many distinct indices are pending.
    pub max_batch: usize,
    /// Flush anything pending at this period.
    pub interval: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch: DEFAULT_FANOUT_BATCH_SIZE,
            interval: Duration::from_millis(DEFAULT_FANOUT_INTERVAL_MS),
        }
    }
}

/// A batching pipeline for the coalescer `C`.
pub struct BatchPipeline<C: Coalescer> {
    store: Arc<dyn BoardStore>,
    hub: Arc<ViewerHub>,
    settings: BatchSettings,
    _coalescer: PhantomData<fn() -> C>,
}

/// Pipeline emitting `batched_bit_toggles`.
pub type TogglePipeline = BatchPipeline<PendingToggles>;

/// Pipeline emitting `batched_frozen_bits`.
pub type FreezePipeline = BatchPipeline<PendingFreezes>;

impl<C: Coalescer> BatchPipeline<C> {
    /// Pipeline reading from `store`'s feed and writing to `hub`.
    pub fn new(store: Arc<dyn BoardStore>, hub: Arc<ViewerHub>, settings: BatchSettings) -> Self {
        Self {
            store,
            hub,
            settings,
            _coalescer: PhantomData,
        }
    }

    /// Run until cancelled.
    ///
    /// Returns an error if the subscription cannot be made or the feed ends,
    /// so a supervisor can resubscribe. Pending changes are flushed on the way
    /// out.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), String> {
        let topic = C::TOPIC;
        let mut feed = self.store.subscribe(topic).await.map_err(|e| format!("subscribe to {topic}: {e}"))?;
        let mut pending = C::default();
        let max_batch = self.settings.max_batch.max(1);

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        info!(%topic, max_batch, interval_ms = self.settings.interval.as_millis() as u64, "fan-out pipeline started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush(&mut pending);
                    return Ok(());
                }
                payload = feed.recv() => {
                    let Some(payload) = payload else {
                        self.flush(&mut pending);
                        return Err(format!("feed {topic} closed"));
                    };
                    match decode_feed_payload::<C::Event>(&payload) {
                        Ok(event) => {
                            pending.push(event);
                            if pending.len() >= max_batch {
                                self.flush(&mut pending);
                            }
                        }
                        Err(err) => warn!(%topic, error = %err, "dropping malformed feed payload"),
                    }
                }
                _ = ticker.tick() => self.flush(&mut pending),
            }
        }
    }

    fn flush(&self, pending: &mut C) {
        if pending.is_empty() {
            return;
        }
        let size = pending.len();
        let event = pending.take();
        let reached = self.hub.broadcast(&event);
        debug!(event = event.name(), size, reached, "fan-out batch emitted");
    }
}
