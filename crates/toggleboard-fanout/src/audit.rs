//! Audit log batching.
//!
//! Accepted mutations are queued through an [`AuditSink`] and appended to the
//! daily audit list by the [`AuditLogBatcher`] when the buffer reaches its size
//! limit or the flush interval passes. The queue is bounded and producers never
//! wait on it: when it is full the record is dropped and counted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use toggleboard_admission::AbuseDetector;
use toggleboard_core::AuditRecord;
use toggleboard_core::BoardStore;
use toggleboard_core::constants::DEFAULT_AUDIT_BATCH_SIZE;
use toggleboard_core::constants::DEFAULT_AUDIT_FLUSH_INTERVAL_MS;
use toggleboard_core::constants::DEFAULT_AUDIT_QUEUE_CAPACITY;
use toggleboard_core::constants::DEFAULT_MAX_AUDIT_ENTRIES_PER_DAY;
use toggleboard_core::pure::audit_day;
use toggleboard_core::pure::format_entry;

use crate::hub::ViewerHub;

/// Audit batching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditSettings {
    /// Flush once this many records are buffered.
    pub batch_size: usize,
    /// Flush at least this often.
    pub flush_interval: Duration,
    /// Capacity of the producer queue.
    pub queue_capacity: usize,
    /// Cap on the length of one daily list.
    pub max_entries_per_day: u64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_AUDIT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_AUDIT_FLUSH_INTERVAL_MS),
            queue_capacity: DEFAULT_AUDIT_QUEUE_CAPACITY,
            max_entries_per_day: DEFAULT_MAX_AUDIT_ENTRIES_PER_DAY,
        }
    }
}

/// Producer handle for the audit queue.
#[derive(Debug, Clone)]
pub struct AuditSink {
    sender: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    /// Queue `record` without waiting. Returns false if it was dropped.
    pub fn submit(&self, record: AuditRecord) -> bool {
        match self.sender.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(index = record.index, dropped, "audit queue full, record dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::AcqRel);
                warn!("audit batcher stopped, record dropped");
                false
            }
        }
    }

    /// Records dropped since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }
}

/// Consumer that appends queued records to the store.
pub struct AuditLogBatcher {
    store: Arc<dyn BoardStore>,
    settings: AuditSettings,
    receiver: Mutex<mpsc::Receiver<AuditRecord>>,
    dropped: Arc<AtomicU64>,
    flushes: AtomicU64,
    hub: Option<Arc<ViewerHub>>,
    abuse: Option<Arc<AbuseDetector>>,
}

impl AuditLogBatcher {
    /// Create the queue and its consumer.
    pub fn new(store: Arc<dyn BoardStore>, settings: AuditSettings) -> (AuditSink, Self) {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let sink = AuditSink {
            sender,
            dropped: Arc::clone(&dropped),
        };
        let batcher = Self {
            store,
            settings,
            receiver: Mutex::new(receiver),
            dropped,
            flushes: AtomicU64::new(0),
            hub: None,
            abuse: None,
        };
        (sink, batcher)
    }

    /// Flushes that wrote at least one entry.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Acquire)
    }

    /// Include viewer and abuse figures in the per-flush stats line.
    pub fn with_stats_sources(mut self, hub: Arc<ViewerHub>, abuse: Arc<AbuseDetector>) -> Self {
        self.hub = Some(hub);
        self.abuse = Some(abuse);
        self
    }

    /// Run until cancelled or every sink is gone, flushing what is buffered on exit.
    ///
    /// Safe to call again after a failure; the queue outlives each run.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), String> {
        let mut receiver = self.receiver.lock().await;
        let batch_size = self.settings.batch_size.max(1);
        let mut buffer: Vec<AuditRecord> = Vec::with_capacity(batch_size);

        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    while let Ok(record) = receiver.try_recv() {
                        buffer.push(record);
                    }
                    self.flush(&mut buffer).await;
                    return Ok(());
                }
                record = receiver.recv() => {
                    let Some(record) = record else {
                        self.flush(&mut buffer).await;
                        return Ok(());
                    };
                    buffer.push(record);
                    if buffer.len() >= batch_size {
                        self.flush(&mut buffer).await;
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut buffer).await;
                }
            }
        }
    }

    /// Append `buffer` to the daily lists and clear it, logging stats when
    /// anything was written. Returns the records written.
    async fn flush(&self, buffer: &mut Vec<AuditRecord>) -> usize {
        if buffer.is_empty() {
            return 0;
        }
        let mut by_day: BTreeMap<NaiveDate, Vec<String>> = BTreeMap::new();
        for record in buffer.drain(..) {
            by_day.entry(audit_day(record.timestamp_ms)).or_default().push(format_entry(&record));
        }

        let mut written = 0;
        for (day, entries) in by_day {
            match self.store.append_audit(day, &entries, self.settings.max_entries_per_day).await {
                Ok(length) => {
                    written += entries.len();
                    if length > self.settings.max_entries_per_day {
                        debug!(%day, length, "daily audit list at capacity, newest entries discarded");
                    }
                }
                Err(err) => {
                    self.dropped.fetch_add(entries.len() as u64, Ordering::AcqRel);
                    warn!(%day, entries = entries.len(), error = %err, "audit flush failed, entries dropped");
                }
            }
        }
        if written > 0 {
            self.flushes.fetch_add(1, Ordering::AcqRel);
            self.log_stats(written);
        }
        written
    }

    fn log_stats(&self, flushed: usize) {
        let viewers = self.hub.as_ref().map(|hub| hub.viewer_count()).unwrap_or(0);
        let abuse = self.abuse.as_ref().map(|abuse| abuse.stats()).unwrap_or_default();
        info!(
            flushed,
            viewers,
            abuse_keys = abuse.tracked_keys,
            abuse_total = abuse.total_score,
            dropped = self.dropped.load(Ordering::Acquire),
            "audit flush"
        );
    }
}
