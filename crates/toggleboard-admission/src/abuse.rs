//! Per-client abuse scoring.
//!
//! Every gated attempt (connection open, toggle, plain HTTP request) adds one
//! point to the caller's score. Scores at or above `max_allowed` are admitted
//! with a probability that halves every `unit_size` points. A decay loop
//! subtracts `max_allowed * mercy_ratio` from every score each interval and
//! drops keys that reach zero, so the map only holds recently active keys.
//!
//! Scores live in a [`DashMap`] of atomics: updates to one key never take a
//! process-wide lock and never block other keys.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use toggleboard_core::constants::DEFAULT_ABUSE_DECAY_INTERVAL_MS;
use toggleboard_core::constants::DEFAULT_ABUSE_MAX_ALLOWED;
use toggleboard_core::constants::DEFAULT_ABUSE_MERCY_RATIO;
use toggleboard_core::constants::DEFAULT_ABUSE_UNIT_SIZE;
use toggleboard_core::pure::decay_amount;
use toggleboard_core::pure::decayed_score;
use toggleboard_core::pure::should_admit;

/// Abuse scoring parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AbuseConfig {
    /// Scores below this are always admitted.
    pub max_allowed: u64,
    /// Score points per halving of the pass probability.
    pub unit_size: u64,
    /// Time between decay cycles.
    pub decay_interval: Duration,
    /// Multiplier of `max_allowed` forgiven per decay cycle.
    pub mercy_ratio: u64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            max_allowed: DEFAULT_ABUSE_MAX_ALLOWED,
            unit_size: DEFAULT_ABUSE_UNIT_SIZE,
            decay_interval: Duration::from_millis(DEFAULT_ABUSE_DECAY_INTERVAL_MS),
            mercy_ratio: DEFAULT_ABUSE_MERCY_RATIO,
        }
    }
}

/// Gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The attempt may proceed.
    Admitted {
        /// Score after counting this attempt.
        score: u64,
    },
    /// The attempt is refused.
    Throttled {
        /// Score after counting this attempt.
        score: u64,
    },
}

impl Admission {
    /// True for [`Admission::Admitted`].
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    /// Score after counting the attempt.
    pub fn score(&self) -> u64 {
        match self {
            Admission::Admitted { score } | Admission::Throttled { score } => *score,
        }
    }
}

/// Aggregate view of the score map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbuseStats {
    /// Keys currently tracked.
    pub tracked_keys: usize,
    /// Sum of all scores.
    pub total_score: u64,
}

/// Result of one decay cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayReport {
    /// Keys whose score was reduced.
    pub decayed: usize,
    /// Keys dropped after reaching zero.
    pub removed: usize,
}

/// Concurrent per-client-key abuse scores.
#[derive(Debug)]
pub struct AbuseDetector {
    scores: DashMap<String, AtomicU64>,
    config: AbuseConfig,
}

impl AbuseDetector {
    /// Create an empty detector.
    pub fn new(config: AbuseConfig) -> Self {
        Self {
            scores: DashMap::new(),
            config,
        }
    }

    /// Scoring parameters.
    pub fn config(&self) -> &AbuseConfig {
        &self.config
    }

    /// Count one attempt for `key` and return the new score.
    pub fn record(&self, key: &str) -> u64 {
        if let Some(score) = self.scores.get(key) {
            return score.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        }
        let score = self.scores.entry(key.to_string()).or_insert_with(|| AtomicU64::new(0));
        score.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Count one attempt for `key` and decide whether it may proceed.
    pub fn gate(&self, key: &str) -> Admission {
        let draw: f64 = rand::rng().random();
        self.gate_with_draw(key, draw)
    }

    /// [`gate`](Self::gate) with the uniform `[0, 1)` draw supplied by the caller.
    pub fn gate_with_draw(&self, key: &str, draw: f64) -> Admission {
        let score = self.record(key);
        if should_admit(score, self.config.max_allowed, self.config.unit_size, draw) {
            Admission::Admitted { score }
        } else {
            debug!(client_key = %key, score, "attempt throttled");
            Admission::Throttled { score }
        }
    }

    /// Current score of `key`, `None` if it is not tracked.
    pub fn score(&self, key: &str) -> Option<u64> {
        self.scores.get(key).map(|score| score.load(Ordering::Acquire))
    }

    /// Number of tracked keys and the sum of their scores.
    pub fn stats(&self) -> AbuseStats {
        let mut stats = AbuseStats::default();
        for entry in self.scores.iter() {
            stats.tracked_keys += 1;
            stats.total_score = stats.total_score.saturating_add(entry.value().load(Ordering::Acquire));
        }
        stats
    }

    /// Run one decay cycle.
    pub fn decay(&self) -> DecayReport {
        let amount = decay_amount(self.config.max_allowed, self.config.mercy_ratio);
        let mut report = DecayReport::default();
        let mut exhausted = Vec::new();

        for entry in self.scores.iter() {
            let previous = entry
                .value()
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |score| Some(decayed_score(score, amount)))
                .unwrap_or_else(|score| score);
            report.decayed += 1;
            if decayed_score(previous, amount) == 0 {
                exhausted.push(entry.key().clone());
            }
        }

        // Removal happens after iteration; removing while holding a shard read guard deadlocks.
        for key in exhausted {
            if self.scores.remove_if(&key, |_, score| score.load(Ordering::Acquire) == 0).is_some() {
                report.removed += 1;
            }
        }
        report
    }

    /// Decay all scores every `decay_interval` until cancelled.
    pub async fn run_decay(self: Arc<Self>, cancel: CancellationToken) -> Result<(), String> {
        let mut ticker = tokio::time::interval(self.config.decay_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let report = self.decay();
                    if report.removed > 0 {
                        info!(decayed = report.decayed, removed = report.removed, "abuse scores decayed");
                    } else {
                        debug!(decayed = report.decayed, "abuse scores decayed");
                    }
                }
            }
        }
    }
}
