//! [`BoardStore`] over Redis.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::Client;
use redis::RedisError;
use redis::Script;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::info;
use tracing::warn;

use toggleboard_core::BoardSettings;
use toggleboard_core::BoardState;
use toggleboard_core::BoardStore;
use toggleboard_core::FeedSubscription;
use toggleboard_core::FeedTopic;
use toggleboard_core::LastCheckedPage;
use toggleboard_core::StoreError;
use toggleboard_core::ToggleOutcome;
use toggleboard_core::bitset::byte_len;
use toggleboard_core::constants::AUDIT_LOG_KEY_PREFIX;
use toggleboard_core::constants::CHECKBOX_BITSET_KEY;
use toggleboard_core::constants::FEED_SUBSCRIPTION_CAPACITY;
use toggleboard_core::constants::FREEZE_THRESHOLD_KEY;
use toggleboard_core::constants::FROZEN_BITSET_KEY;
use toggleboard_core::constants::FROZEN_COUNT_KEY;
use toggleboard_core::constants::LAST_CHECKED_KEY;
use toggleboard_core::constants::TOGGLE_COUNT_KEY;
use toggleboard_core::error::Result;
use toggleboard_core::pure::audit_key;
use toggleboard_core::pure::parse_audit_key;

use crate::scripts;

/// Per-operation deadline when none is configured.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: u64 = 500;

/// Board store backed by a Redis primary and an optional read replica.
///
/// Transactions and writes go to the primary. Snapshot reads and feed
/// subscriptions go to the replica when one is configured.
#[derive(Clone)]
pub struct RedisBoardStore {
    primary: ConnectionManager,
    replica: ConnectionManager,
    subscriber: Client,
    toggle: Script,
    freeze_if_stale: Script,
    reconcile: Script,
    timeout: Duration,
}

impl RedisBoardStore {
    /// Connect to `primary_url`, reading from `replica_url` when given.
    pub async fn connect(primary_url: &str, replica_url: Option<&str>) -> Result<Self> {
        let primary_client = Client::open(primary_url).map_err(map_redis_error("connect"))?;
        let primary = primary_client.get_connection_manager().await.map_err(map_redis_error("connect"))?;

        let (replica, subscriber) = match replica_url {
            Some(url) => {
                let client = Client::open(url).map_err(map_redis_error("connect replica"))?;
                let manager = client.get_connection_manager().await.map_err(map_redis_error("connect replica"))?;
                info!(replica = %url, "reading board state from replica");
                (manager, client)
            }
            None => (primary.clone(), primary_client),
        };

        Ok(Self {
            primary,
            replica,
            subscriber,
            toggle: Script::new(scripts::TOGGLE),
            freeze_if_stale: Script::new(scripts::FREEZE_IF_STALE),
            reconcile: Script::new(scripts::RECONCILE),
            timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    /// Override the per-operation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(map_redis_error(operation)),
            Err(_) => Err(StoreError::Timeout {
                operation: operation.to_string(),
                duration_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Classify a Redis failure.
pub fn map_redis_error(operation: &'static str) -> impl Fn(RedisError) -> StoreError {
    move |err| {
        if err.is_timeout() {
            StoreError::Timeout {
                operation: operation.to_string(),
                duration_ms: 0,
            }
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Unavailable {
                reason: format!("{operation}: {err}"),
            }
        } else {
            StoreError::Script {
                script: operation.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Interpret the `{bit, delta, frozen}` reply of the toggle script.
pub fn parse_toggle_reply((bit, delta, frozen): (i64, i64, i64)) -> Result<ToggleOutcome> {
    if !(0..=1).contains(&bit) || !(-1..=1).contains(&delta) || !(0..=1).contains(&frozen) {
        return Err(StoreError::Script {
            script: "toggle".to_string(),
            reason: format!("unexpected reply {{{bit}, {delta}, {frozen}}}"),
        });
    }
    Ok(ToggleOutcome {
        bit: bit == 1,
        delta,
        frozen: frozen == 1,
    })
}

fn parse_counter(key: &str, value: Option<i64>) -> Result<u64> {
    let value = value.unwrap_or(0);
    u64::try_from(value).map_err(|_| StoreError::CorruptedValue {
        key: key.to_string(),
        reason: format!("negative counter {value}"),
    })
}

#[async_trait]
impl BoardStore for RedisBoardStore {
    async fn initialize(&self, settings: &BoardSettings) -> Result<()> {
        let mut conn = self.primary.clone();
        let empty = vec![0u8; byte_len(settings.total_cells)];
        let mut pipe = redis::pipe();
        pipe.set_nx(CHECKBOX_BITSET_KEY, &empty)
            .ignore()
            .set_nx(FROZEN_BITSET_KEY, &empty)
            .ignore()
            .set_nx(TOGGLE_COUNT_KEY, settings.initial_count_value())
            .ignore()
            .set_nx(FROZEN_COUNT_KEY, 0)
            .ignore()
            .set(FREEZE_THRESHOLD_KEY, settings.freeze_threshold_ms)
            .ignore();
        self.run("initialize", pipe.query_async::<_, ()>(&mut conn)).await?;
        debug!(cells = settings.total_cells, "redis board initialized");
        Ok(())
    }

    async fn apply_toggle(&self, index: u64, cap: u64) -> Result<ToggleOutcome> {
        let mut conn = self.primary.clone();
        let mut invocation = self.toggle.prepare_invoke();
        invocation
            .key(CHECKBOX_BITSET_KEY)
            .key(TOGGLE_COUNT_KEY)
            .key(FROZEN_BITSET_KEY)
            .key(FROZEN_COUNT_KEY)
            .key(LAST_CHECKED_KEY)
            .key(FREEZE_THRESHOLD_KEY)
            .arg(index)
            .arg(cap);
        let reply: (i64, i64, i64) = self.run("apply_toggle", invocation.invoke_async(&mut conn)).await?;
        parse_toggle_reply(reply)
    }

    async fn board_state(&self) -> Result<BoardState> {
        let mut conn = self.replica.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .get(CHECKBOX_BITSET_KEY)
            .get(FROZEN_BITSET_KEY)
            .get(TOGGLE_COUNT_KEY)
            .get(FROZEN_COUNT_KEY);
        let (bits, frozen, count, frozen_count): (Option<Vec<u8>>, Option<Vec<u8>>, Option<i64>, Option<i64>) =
            self.run("board_state", pipe.query_async(&mut conn)).await?;
        Ok(BoardState {
            bits: bits.unwrap_or_default(),
            frozen: frozen.unwrap_or_default(),
            count: parse_counter(TOGGLE_COUNT_KEY, count)?,
            frozen_count: parse_counter(FROZEN_COUNT_KEY, frozen_count)?,
        })
    }

    async fn freeze_threshold(&self) -> Result<Option<u64>> {
        let mut conn = self.primary.clone();
        self.run("freeze_threshold", conn.get(FREEZE_THRESHOLD_KEY)).await
    }

    async fn set_freeze_threshold(&self, threshold_ms: u64) -> Result<()> {
        let mut conn = self.primary.clone();
        self.run("set_freeze_threshold", conn.set(FREEZE_THRESHOLD_KEY, threshold_ms)).await
    }

    async fn server_time_ms(&self) -> Result<u64> {
        let mut conn = self.primary.clone();
        let (secs, micros): (u64, u64) = self.run("server_time", redis::cmd("TIME").query_async(&mut conn)).await?;
        Ok(secs.saturating_mul(1000).saturating_add(micros / 1000))
    }

    async fn scan_last_checked(&self, cursor: u64, page_size: usize) -> Result<LastCheckedPage> {
        let mut conn = self.primary.clone();
        let (next_cursor, flat): (u64, Vec<String>) = self
            .run(
                "scan_last_checked",
                redis::cmd("HSCAN")
                    .arg(LAST_CHECKED_KEY)
                    .arg(cursor)
                    .arg("COUNT")
                    .arg(page_size.max(1))
                    .query_async(&mut conn),
            )
            .await?;

        let mut entries = Vec::with_capacity(flat.len() / 2);
        for pair in flat.chunks_exact(2) {
            match (pair[0].parse::<u64>(), pair[1].parse::<u64>()) {
                (Ok(index), Ok(at)) => entries.push((index, at)),
                _ => warn!(field = %pair[0], value = %pair[1], "skipping malformed last-checked entry"),
            }
        }
        Ok(LastCheckedPage { next_cursor, entries })
    }

    async fn freeze_if_stale(&self, index: u64, cutoff_ms: u64) -> Result<bool> {
        let mut conn = self.primary.clone();
        let mut invocation = self.freeze_if_stale.prepare_invoke();
        invocation
            .key(CHECKBOX_BITSET_KEY)
            .key(FROZEN_BITSET_KEY)
            .key(LAST_CHECKED_KEY)
            .key(FROZEN_COUNT_KEY)
            .arg(index)
            .arg(cutoff_ms);
        let frozen: i64 = self.run("freeze_if_stale", invocation.invoke_async(&mut conn)).await?;
        Ok(frozen == 1)
    }

    async fn reconcile_counters(&self) -> Result<(u64, u64)> {
        let mut conn = self.primary.clone();
        let mut invocation = self.reconcile.prepare_invoke();
        invocation
            .key(CHECKBOX_BITSET_KEY)
            .key(FROZEN_BITSET_KEY)
            .key(TOGGLE_COUNT_KEY)
            .key(FROZEN_COUNT_KEY);
        self.run("reconcile_counters", invocation.invoke_async(&mut conn)).await
    }

    async fn set_toggle_count(&self, value: u64) -> Result<()> {
        let mut conn = self.primary.clone();
        self.run("set_toggle_count", conn.set(TOGGLE_COUNT_KEY, value)).await
    }

    async fn append_audit(&self, day: NaiveDate, entries: &[String], max_len: u64) -> Result<u64> {
        if entries.is_empty() {
            return Ok(0);
        }
        let key = audit_key(day);
        let stop = isize::try_from(max_len).unwrap_or(isize::MAX).saturating_sub(1);
        let mut conn = self.primary.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().rpush(&key, entries).ltrim(&key, 0, stop).ignore();
        let (length,): (u64,) = self.run("append_audit", pipe.query_async(&mut conn)).await?;
        Ok(length)
    }

    async fn read_audit(&self, day: NaiveDate, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.replica.clone();
        let start = isize::try_from(start).unwrap_or(isize::MAX);
        let stop = isize::try_from(stop).unwrap_or(isize::MAX);
        self.run("read_audit", conn.lrange(audit_key(day), start, stop)).await
    }

    async fn audit_days(&self) -> Result<Vec<NaiveDate>> {
        let mut conn = self.primary.clone();
        let pattern = format!("{AUDIT_LOG_KEY_PREFIX}*");
        let mut cursor = 0u64;
        let mut days = Vec::new();
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run(
                    "audit_days",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;
            for key in keys {
                match parse_audit_key(&key) {
                    Some(day) => days.push(day),
                    None => warn!(%key, "ignoring audit key with unparseable date"),
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        days.sort_unstable();
        days.dedup();
        Ok(days)
    }

    async fn delete_audit_day(&self, day: NaiveDate) -> Result<bool> {
        let mut conn = self.primary.clone();
        let removed: u64 = self.run("delete_audit_day", conn.del(audit_key(day))).await?;
        Ok(removed > 0)
    }

    async fn publish(&self, topic: FeedTopic, payload: String) -> Result<()> {
        let mut conn = self.primary.clone();
        let _receivers: u64 = self.run("publish", conn.publish(topic.as_str(), payload)).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: FeedTopic) -> Result<FeedSubscription> {
        let mut pubsub = self.run("subscribe", self.subscriber.get_async_pubsub()).await?;
        self.run("subscribe", pubsub.subscribe(topic.as_str())).await?;

        let (sender, subscription) = FeedSubscription::channel(topic, FEED_SUBSCRIPTION_CAPACITY);
        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            loop {
                tokio::select! {
                    _ = sender.closed() => break,
                    message = messages.next() => {
                        let Some(message) = message else {
                            warn!(%topic, "redis feed connection closed");
                            break;
                        };
                        let payload: String = match message.get_payload() {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(%topic, error = %err, "dropping non-text feed payload");
                                continue;
                            }
                        };
                        match sender.try_send(payload) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => debug!(%topic, "feed subscriber full, dropping message"),
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            debug!(%topic, "feed forwarder stopped");
        });
        Ok(subscription)
    }
}
