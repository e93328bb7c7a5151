//! The toggle path: admission, validation, the atomic transaction, then audit
//! and change-feed announcements.

use std::sync::Arc;

use snafu::ResultExt;
use snafu::Snafu;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use toggleboard_admission::AbuseDetector;
use toggleboard_admission::Admission;
use toggleboard_core::AuditRecord;
use toggleboard_core::AuditTag;
use toggleboard_core::BoardStore;
use toggleboard_core::FreezeEvent;
use toggleboard_core::StoreError;
use toggleboard_core::TimeProvider;
use toggleboard_core::ToggleEvent;
use toggleboard_core::ToggleOutcome;
use toggleboard_core::ValidationError;
use toggleboard_core::pure::validate_index;
use toggleboard_fanout::AuditSink;

/// Why a toggle attempt was not carried out.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ToggleError {
    /// The client's abuse score failed the admission gate.
    #[snafu(display("client {client_key} throttled at score {score}"))]
    Throttled { client_key: String, score: u64 },

    /// The request named a cell outside the board.
    #[snafu(display("invalid toggle request: {source}"))]
    InvalidIndex { source: ValidationError },

    /// The store transaction failed; nothing was applied.
    #[snafu(display("toggle transaction failed: {source}"))]
    Store { source: StoreError },
}

/// Result alias for toggle operations.
pub type Result<T, E = ToggleError> = std::result::Result<T, E>;

/// Runs toggles on behalf of connection handlers.
///
/// Holds no board state of its own; every decision is made inside the store
/// transaction.
#[derive(Clone)]
pub struct ToggleService {
    store: Arc<dyn BoardStore>,
    abuse: Arc<AbuseDetector>,
    audit: AuditSink,
    clock: Arc<dyn TimeProvider>,
    total_cells: u64,
    global_cap: u64,
}

impl ToggleService {
    /// Create a service over `store` for a board of `total_cells` capped at `global_cap`.
    pub fn new(
        store: Arc<dyn BoardStore>,
        abuse: Arc<AbuseDetector>,
        audit: AuditSink,
        clock: Arc<dyn TimeProvider>,
        total_cells: u64,
        global_cap: u64,
    ) -> Self {
        Self {
            store,
            abuse,
            audit,
            clock,
            total_cells,
            global_cap,
        }
    }

    /// Shared store.
    pub fn store(&self) -> &Arc<dyn BoardStore> {
        &self.store
    }

    /// Abuse detector gating this service.
    pub fn abuse(&self) -> &Arc<AbuseDetector> {
        &self.abuse
    }

    /// Clock used for event timestamps.
    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    /// Count one attempt for `client_key` and decide whether it may proceed.
    pub fn gate(&self, client_key: &str) -> Result<u64> {
        match self.abuse.gate(client_key) {
            Admission::Admitted { score } => Ok(score),
            Admission::Throttled { score } => Err(ToggleError::Throttled {
                client_key: client_key.to_string(),
                score,
            }),
        }
    }

    /// Gate, validate and apply one toggle request from `client_key`.
    ///
    /// The IPv6 flag does not change the toggle path; it is carried so callers
    /// can log it alongside the outcome.
    #[instrument(skip(self), level = "debug")]
    pub async fn toggle(&self, client_key: &str, is_ipv6: bool, index: i64) -> Result<ToggleOutcome> {
        self.gate(client_key)?;
        self.toggle_admitted(client_key, index).await
    }

    /// Validate and apply a toggle for a caller that already passed the gate.
    pub async fn toggle_admitted(&self, client_key: &str, index: i64) -> Result<ToggleOutcome> {
        let index = validate_index(index, self.total_cells).context(InvalidIndexSnafu)?;
        let outcome = self.store.apply_toggle(index, self.global_cap).await.context(StoreSnafu)?;
        let timestamp_ms = self.clock.now_unix_ms();

        if outcome.frozen {
            debug!(index, "cell frozen");
            self.record(client_key, index, true, AuditTag::Frozen, timestamp_ms);
            let event = FreezeEvent { index, timestamp_ms };
            if let Err(err) = self.store.publish_freeze(&event).await {
                warn!(index, error = %err, "failed to announce freeze");
            }
        } else if outcome.changed() {
            debug!(index, bit = outcome.bit, delta = outcome.delta, "cell toggled");
            self.record(client_key, index, outcome.bit, AuditTag::New, timestamp_ms);
            let event = ToggleEvent {
                index,
                bit: outcome.bit,
                timestamp_ms,
            };
            if let Err(err) = self.store.publish_toggle(&event).await {
                warn!(index, error = %err, "failed to announce toggle");
            }
        }
        Ok(outcome)
    }

    fn record(&self, client_key: &str, index: u64, state: bool, tag: AuditTag, timestamp_ms: u64) {
        self.audit.submit(AuditRecord {
            client_key: client_key.to_string(),
            index,
            state,
            tag,
            timestamp_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use toggleboard_admission::AbuseConfig;
    use toggleboard_core::BoardSettings;
    use toggleboard_core::FeedTopic;
    use toggleboard_core::InMemoryBoardStore;
    use toggleboard_core::InitialCount;
    use toggleboard_core::SimulatedTimeProvider;
    use toggleboard_fanout::AuditLogBatcher;
    use toggleboard_fanout::AuditSettings;

    use super::*;

    const CELLS: u64 = 64;

    struct Harness {
        service: ToggleService,
        store: Arc<InMemoryBoardStore>,
        clock: Arc<SimulatedTimeProvider>,
        batcher: AuditLogBatcher,
    }

    async fn harness(max_allowed: u64, threshold_ms: u64) -> Harness {
        let clock = Arc::new(SimulatedTimeProvider::new(1_000));
        let store = Arc::new(InMemoryBoardStore::with_clock(clock.clone()));
        store
            .initialize(&BoardSettings {
                total_cells: CELLS,
                global_cap: CELLS,
                freeze_threshold_ms: threshold_ms,
                initial_count: InitialCount::Zero,
            })
            .await
            .unwrap();
        let abuse = Arc::new(AbuseDetector::new(AbuseConfig {
            max_allowed,
            unit_size: 1,
            decay_interval: Duration::from_secs(60),
            mercy_ratio: 1,
        }));
        let (sink, batcher) = AuditLogBatcher::new(store.clone(), AuditSettings::default());
        let service = ToggleService::new(store.clone(), abuse, sink, clock.clone(), CELLS, CELLS);
        Harness {
            service,
            store,
            clock,
            batcher,
        }
    }

    #[tokio::test]
    async fn toggle_applies_and_announces() {
        let h = harness(1000, 60_000).await;
        let mut feed = h.store.subscribe(FeedTopic::Toggles).await.unwrap();

        let outcome = h.service.toggle("203.0.113.9", false, 5).await.unwrap();
        assert!(outcome.bit);
        assert_eq!(outcome.delta, 1);

        let payload = feed.recv().await.unwrap();
        assert_eq!(payload, "[5,1,1000]");
        assert_eq!(h.store.board_state().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn out_of_range_index_is_rejected_before_the_store() {
        let h = harness(1000, 60_000).await;
        let err = h.service.toggle("203.0.113.9", false, CELLS as i64).await.unwrap_err();
        assert!(matches!(err, ToggleError::InvalidIndex { .. }));

        let err = h.service.toggle("203.0.113.9", false, -1).await.unwrap_err();
        assert!(matches!(err, ToggleError::InvalidIndex { .. }));
        assert_eq!(h.store.board_state().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn throttled_client_changes_nothing() {
        let h = harness(1, 60_000).await;
        // With unit_size 1 the pass chance halves on every attempt past the first.
        let mut throttled = 0;
        for _ in 0..64 {
            match h.service.toggle("198.51.100.7", false, 3).await {
                Err(ToggleError::Throttled { .. }) => throttled += 1,
                Ok(_) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(throttled > 50);
        let state = h.store.board_state().await.unwrap();
        assert!(state.count <= 1);
    }

    #[tokio::test]
    async fn lazy_freeze_announces_and_audits() {
        let h = harness(1000, 1000).await;
        let mut freezes = h.store.subscribe(FeedTopic::Freezes).await.unwrap();

        h.service.toggle("192.0.2.1", false, 7).await.unwrap();
        h.clock.advance_ms(1500);
        let outcome = h.service.toggle("192.0.2.1", false, 7).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::freeze());

        assert_eq!(freezes.recv().await.unwrap(), "[7,2500]");

        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();
        h.batcher.run(cancel).await.unwrap();

        let day = toggleboard_core::pure::audit_day(2500);
        let entries = h.store.read_audit(day, 0, -1).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("|192.0.2.1|7|True|new"));
        assert!(entries[1].ends_with("|192.0.2.1|7|True|frozen"));
    }

    #[tokio::test]
    async fn no_op_toggle_is_not_announced() {
        let h = harness(1000, 0).await;
        h.store.set_toggle_count(CELLS).await.unwrap();
        let mut feed = h.store.subscribe(FeedTopic::Toggles).await.unwrap();

        let outcome = h.service.toggle("192.0.2.1", false, 1).await.unwrap();
        assert!(!outcome.changed());
        assert!(tokio::time::timeout(Duration::from_millis(20), feed.recv()).await.is_err());
    }
}
