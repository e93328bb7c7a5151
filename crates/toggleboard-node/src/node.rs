//! Node bootstrap: store selection, initialization and the supervised
//! background tasks.

use std::sync::Arc;
use std::time::Duration;

use snafu::ResultExt;
use snafu::Snafu;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use toggleboard_admission::AbuseDetector;
use toggleboard_admission::ClassifierError;
use toggleboard_admission::ConnectionClassifier;
use toggleboard_core::BoardStore;
use toggleboard_core::InMemoryBoardStore;
use toggleboard_core::InitialCount;
use toggleboard_core::StoreError;
use toggleboard_core::TimeProvider;
use toggleboard_fanout::AuditLogBatcher;
use toggleboard_fanout::FreezePipeline;
use toggleboard_fanout::SnapshotPublisher;
use toggleboard_fanout::TogglePipeline;
use toggleboard_fanout::ViewerHub;
use toggleboard_redis::RedisBoardStore;

use crate::config::NodeConfig;
use crate::config::StoreConfig;
use crate::maintenance::run_audit_retention;
use crate::maintenance::run_freeze_sweeper;
use crate::server::AppState;
use crate::service::ToggleService;
use crate::supervisor::spawn_supervised;

/// Errors while bringing a node up.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NodeError {
    /// The store could not be reached or initialized.
    #[snafu(display("board store: {source}"))]
    Store { source: StoreError },

    /// The trusted proxy header is not a valid header name.
    #[snafu(display("client classifier: {source}"))]
    Classifier { source: ClassifierError },
}

/// Open the configured store, falling back to memory when no Redis URL is set.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn BoardStore>, NodeError> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let store = RedisBoardStore::connect(url, config.redis_replica_url.as_deref()).await.context(StoreSnafu)?;
            info!("connected to redis");
            Ok(Arc::new(store))
        }
        None => {
            warn!("no redis url configured, board state is process-local and lost on exit");
            Ok(Arc::new(InMemoryBoardStore::new()))
        }
    }
}

/// A running node: shared handler state plus its supervised tasks.
pub struct BoardNode {
    state: AppState,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl BoardNode {
    /// Initialize the board in `store` and start every background task.
    pub async fn start(
        config: &NodeConfig,
        store: Arc<dyn BoardStore>,
        clock: Arc<dyn TimeProvider>,
    ) -> Result<Self, NodeError> {
        let settings = config.board_settings();
        store.initialize(&settings).await.context(StoreSnafu)?;
        if settings.initial_count == InitialCount::Cap {
            warn!(
                cap = settings.global_cap,
                "toggle counter is seeded at the global cap: the board stays read-only until the counter is \
                 lowered (toggleboard-cli board reconcile)"
            );
        }

        let cancel = CancellationToken::new();
        let classifier = Arc::new(
            ConnectionClassifier::new(&config.network.trusted_proxy_header, config.network.fallback_client_addr.clone())
                .context(ClassifierSnafu)?,
        );
        let hub = Arc::new(ViewerHub::new(config.fanout.hub_capacity));
        let abuse = Arc::new(AbuseDetector::new(config.abuse_config()));
        let (audit_sink, batcher) = AuditLogBatcher::new(Arc::clone(&store), config.audit_settings());
        let batcher = Arc::new(batcher.with_stats_sources(Arc::clone(&hub), Arc::clone(&abuse)));

        let service = ToggleService::new(
            Arc::clone(&store),
            Arc::clone(&abuse),
            audit_sink,
            Arc::clone(&clock),
            settings.total_cells,
            settings.global_cap,
        );

        let mut tasks = Vec::new();

        tasks.push(spawn_supervised("abuse-decay", cancel.clone(), {
            let abuse = Arc::clone(&abuse);
            let cancel = cancel.clone();
            move || Arc::clone(&abuse).run_decay(cancel.clone())
        }).1);

        tasks.push(spawn_supervised("audit-batcher", cancel.clone(), {
            let batcher = Arc::clone(&batcher);
            let cancel = cancel.clone();
            move || {
                let batcher = Arc::clone(&batcher);
                let cancel = cancel.clone();
                async move { batcher.run(cancel).await }
            }
        }).1);

        let toggles = Arc::new(TogglePipeline::new(Arc::clone(&store), Arc::clone(&hub), config.toggle_batch_settings()));
        tasks.push(spawn_supervised("toggle-fanout", cancel.clone(), {
            let cancel = cancel.clone();
            move || {
                let toggles = Arc::clone(&toggles);
                let cancel = cancel.clone();
                async move { toggles.run(cancel).await }
            }
        }).1);

        let freezes = Arc::new(FreezePipeline::new(Arc::clone(&store), Arc::clone(&hub), config.freeze_batch_settings()));
        tasks.push(spawn_supervised("freeze-fanout", cancel.clone(), {
            let cancel = cancel.clone();
            move || {
                let freezes = Arc::clone(&freezes);
                let cancel = cancel.clone();
                async move { freezes.run(cancel).await }
            }
        }).1);

        let snapshots = Arc::new(SnapshotPublisher::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&clock),
            Duration::from_millis(config.fanout.snapshot_interval_ms),
        ));
        tasks.push(spawn_supervised("snapshot-publisher", cancel.clone(), {
            let cancel = cancel.clone();
            move || {
                let snapshots = Arc::clone(&snapshots);
                let cancel = cancel.clone();
                async move { snapshots.run(cancel).await }
            }
        }).1);

        if config.fanout.freeze_sweep_interval_secs > 0 {
            let interval = Duration::from_secs(config.fanout.freeze_sweep_interval_secs);
            let page_size = config.fanout.freeze_sweep_page_size;
            let max_audit_entries = config.audit.max_entries_per_day;
            tasks.push(spawn_supervised("freeze-sweeper", cancel.clone(), {
                let store = Arc::clone(&store);
                let cancel = cancel.clone();
                move || run_freeze_sweeper(Arc::clone(&store), page_size, max_audit_entries, interval, cancel.clone())
            }).1);
        }

        if config.audit.retention_sweep_interval_secs > 0 {
            let interval = Duration::from_secs(config.audit.retention_sweep_interval_secs);
            let retention_days = config.audit.retention_days;
            tasks.push(spawn_supervised("audit-retention", cancel.clone(), {
                let store = Arc::clone(&store);
                let cancel = cancel.clone();
                move || run_audit_retention(Arc::clone(&store), retention_days, interval, cancel.clone())
            }).1);
        }

        info!(
            total_cells = settings.total_cells,
            global_cap = settings.global_cap,
            freeze_threshold_ms = settings.freeze_threshold_ms,
            tasks = tasks.len(),
            "board node started"
        );

        let state = AppState {
            service,
            hub,
            classifier,
            shutdown: cancel.clone(),
        };
        Ok(Self { state, cancel, tasks })
    }

    /// Handler state for the HTTP server.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Token that stops the node when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every task and wait for the final flushes.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "supervisor task ended abnormally");
            }
        }
        info!("board node stopped");
    }
}
