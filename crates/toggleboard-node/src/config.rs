//! Node configuration.
//!
//! Configuration is loaded in layers with the following precedence (lowest to highest):
//! 1. Built-in defaults
//! 2. Environment variables (`TOGGLEBOARD_*`)
//! 3. TOML configuration file
//! 4. Command-line arguments
//!
//! Each layer only overrides the fields it sets to a non-default value.

use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use toggleboard_admission::AbuseConfig;
use toggleboard_admission::classifier::DEFAULT_FALLBACK_CLIENT_ADDR;
use toggleboard_admission::classifier::DEFAULT_TRUSTED_PROXY_HEADER;
use toggleboard_core::BoardSettings;
use toggleboard_core::InitialCount;
use toggleboard_core::constants::DEFAULT_ABUSE_DECAY_INTERVAL_MS;
use toggleboard_core::constants::DEFAULT_ABUSE_MAX_ALLOWED;
use toggleboard_core::constants::DEFAULT_ABUSE_MERCY_RATIO;
use toggleboard_core::constants::DEFAULT_ABUSE_UNIT_SIZE;
use toggleboard_core::constants::DEFAULT_AUDIT_BATCH_SIZE;
use toggleboard_core::constants::DEFAULT_AUDIT_FLUSH_INTERVAL_MS;
use toggleboard_core::constants::DEFAULT_AUDIT_QUEUE_CAPACITY;
use toggleboard_core::constants::DEFAULT_AUDIT_RETENTION_DAYS;
use toggleboard_core::constants::DEFAULT_FANOUT_BATCH_SIZE;
use toggleboard_core::constants::DEFAULT_FANOUT_INTERVAL_MS;
use toggleboard_core::constants::DEFAULT_FREEZE_THRESHOLD_MS;
use toggleboard_core::constants::DEFAULT_GLOBAL_CAP;
use toggleboard_core::constants::DEFAULT_HUB_CAPACITY;
use toggleboard_core::constants::DEFAULT_MAX_AUDIT_ENTRIES_PER_DAY;
use toggleboard_core::constants::DEFAULT_SNAPSHOT_INTERVAL_MS;
use toggleboard_core::constants::DEFAULT_SWEEP_PAGE_SIZE;
use toggleboard_core::constants::DEFAULT_TOTAL_CELLS;
use toggleboard_core::constants::MAX_TOTAL_CELLS;
use toggleboard_fanout::AuditSettings;
use toggleboard_fanout::BatchSettings;

/// Complete configuration of one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeConfig {
    /// Board shape and freeze policy.
    #[serde(default)]
    pub board: BoardConfig,

    /// Abuse scoring.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Audit log batching and retention.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Change fan-out and snapshots.
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// HTTP listener and client classification.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Backing store.
    #[serde(default)]
    pub store: StoreConfig,
}

// ============================================================================
// Sections
// ============================================================================

/// Board shape and freeze policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoardConfig {
    /// Number of cells on the board.
    #[serde(default = "default_total_cells")]
    pub total_cells: u64,

    /// Ceiling on the number of checked cells.
    #[serde(default = "default_global_cap")]
    pub global_cap: u64,

    /// How long a cell stays checked before an uncheck attempt freezes it.
    #[serde(default = "default_freeze_threshold_ms")]
    pub freeze_threshold_ms: u64,

    /// Seed for the toggle counter when the board is first created.
    #[serde(default)]
    pub initial_count: InitialCount,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            total_cells: default_total_cells(),
            global_cap: default_global_cap(),
            freeze_threshold_ms: default_freeze_threshold_ms(),
            initial_count: InitialCount::default(),
        }
    }
}

/// Abuse scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AdmissionConfig {
    /// Scores below this are always admitted.
    #[serde(default = "default_max_allowed")]
    pub max_allowed: u64,

    /// Score points per halving of the pass probability.
    #[serde(default = "default_unit_size")]
    pub unit_size: u64,

    /// Time between decay cycles in milliseconds.
    #[serde(default = "default_decay_interval_ms")]
    pub decay_interval_ms: u64,

    /// Multiplier of `max_allowed` forgiven per decay cycle.
    #[serde(default = "default_mercy_ratio")]
    pub mercy_ratio: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_allowed: default_max_allowed(),
            unit_size: default_unit_size(),
            decay_interval_ms: default_decay_interval_ms(),
            mercy_ratio: default_mercy_ratio(),
        }
    }
}

/// Audit log batching and retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditConfig {
    /// Flush once this many records are buffered.
    #[serde(default = "default_audit_batch_size")]
    pub batch_size: usize,

    /// Flush at least this often, in milliseconds.
    #[serde(default = "default_audit_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Capacity of the producer queue.
    #[serde(default = "default_audit_queue_capacity")]
    pub queue_capacity: usize,

    /// Cap on the length of one daily list.
    #[serde(default = "default_max_entries_per_day")]
    pub max_entries_per_day: u64,

    /// Days of audit lists kept by the retention sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Interval of the in-process retention sweep in seconds, 0 to disable.
    #[serde(default)]
    pub retention_sweep_interval_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batch_size: default_audit_batch_size(),
            flush_interval_ms: default_audit_flush_interval_ms(),
            queue_capacity: default_audit_queue_capacity(),
            max_entries_per_day: default_max_entries_per_day(),
            retention_days: default_retention_days(),
            retention_sweep_interval_secs: 0,
        }
    }
}

/// Change fan-out and snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FanoutConfig {
    /// Maximum indices per toggle batch.
    #[serde(default = "default_fanout_batch_size")]
    pub toggle_batch_size: usize,

    /// Toggle batch flush interval in milliseconds.
    #[serde(default = "default_fanout_interval_ms")]
    pub toggle_interval_ms: u64,

    /// Maximum indices per freeze batch.
    #[serde(default = "default_fanout_batch_size")]
    pub freeze_batch_size: usize,

    /// Freeze batch flush interval in milliseconds.
    #[serde(default = "default_fanout_interval_ms")]
    pub freeze_interval_ms: u64,

    /// Full-state broadcast interval in milliseconds.
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    /// Frames buffered per viewer before it starts lagging.
    #[serde(default = "default_hub_capacity")]
    pub hub_capacity: usize,

    /// Interval of the in-process freeze sweeper in seconds, 0 to disable.
    #[serde(default)]
    pub freeze_sweep_interval_secs: u64,

    /// Timestamps fetched per freeze sweeper page.
    #[serde(default = "default_sweep_page_size")]
    pub freeze_sweep_page_size: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            toggle_batch_size: default_fanout_batch_size(),
            toggle_interval_ms: default_fanout_interval_ms(),
            freeze_batch_size: default_fanout_batch_size(),
            freeze_interval_ms: default_fanout_interval_ms(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            hub_capacity: default_hub_capacity(),
            freeze_sweep_interval_secs: 0,
            freeze_sweep_page_size: default_sweep_page_size(),
        }
    }
}

/// HTTP listener and client classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkConfig {
    /// Address of the HTTP/WebSocket listener.
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Header set by our own proxy with the real client address.
    #[serde(default = "default_trusted_proxy_header")]
    pub trusted_proxy_header: String,

    /// Client key used when no address can be resolved.
    #[serde(default = "default_fallback_client_addr")]
    pub fallback_client_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trusted_proxy_header: default_trusted_proxy_header(),
            fallback_client_addr: default_fallback_client_addr(),
        }
    }
}

/// Backing store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// Redis primary URL. The in-memory store is used when unset.
    pub redis_url: Option<String>,

    /// Redis replica URL for snapshot reads and subscriptions.
    pub redis_replica_url: Option<String>,
}

// ============================================================================
// Loading
// ============================================================================

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_toml_str(&content).context(ParseTomlSnafu { path })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables.
    ///
    /// Variables follow the pattern `TOGGLEBOARD_<SECTION>_<FIELD>` in upper case,
    /// for example `TOGGLEBOARD_BOARD_TOTAL_CELLS`. Store URLs are read from
    /// `TOGGLEBOARD_REDIS_URL` and `TOGGLEBOARD_REDIS_REPLICA_URL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key);
        Self {
            board: BoardConfig {
                total_cells: parse_var(get("TOGGLEBOARD_BOARD_TOTAL_CELLS")).unwrap_or_else(default_total_cells),
                global_cap: parse_var(get("TOGGLEBOARD_BOARD_GLOBAL_CAP")).unwrap_or_else(default_global_cap),
                freeze_threshold_ms: parse_var(get("TOGGLEBOARD_BOARD_FREEZE_THRESHOLD_MS"))
                    .unwrap_or_else(default_freeze_threshold_ms),
                initial_count: get("TOGGLEBOARD_BOARD_INITIAL_COUNT")
                    .and_then(|value| parse_initial_count(&value))
                    .unwrap_or_default(),
            },
            admission: AdmissionConfig {
                max_allowed: parse_var(get("TOGGLEBOARD_ADMISSION_MAX_ALLOWED")).unwrap_or_else(default_max_allowed),
                unit_size: parse_var(get("TOGGLEBOARD_ADMISSION_UNIT_SIZE")).unwrap_or_else(default_unit_size),
                decay_interval_ms: parse_var(get("TOGGLEBOARD_ADMISSION_DECAY_INTERVAL_MS"))
                    .unwrap_or_else(default_decay_interval_ms),
                mercy_ratio: parse_var(get("TOGGLEBOARD_ADMISSION_MERCY_RATIO")).unwrap_or_else(default_mercy_ratio),
            },
            audit: AuditConfig {
                batch_size: parse_var(get("TOGGLEBOARD_AUDIT_BATCH_SIZE")).unwrap_or_else(default_audit_batch_size),
                flush_interval_ms: parse_var(get("TOGGLEBOARD_AUDIT_FLUSH_INTERVAL_MS"))
                    .unwrap_or_else(default_audit_flush_interval_ms),
                queue_capacity: parse_var(get("TOGGLEBOARD_AUDIT_QUEUE_CAPACITY"))
                    .unwrap_or_else(default_audit_queue_capacity),
                max_entries_per_day: parse_var(get("TOGGLEBOARD_AUDIT_MAX_ENTRIES_PER_DAY"))
                    .unwrap_or_else(default_max_entries_per_day),
                retention_days: parse_var(get("TOGGLEBOARD_AUDIT_RETENTION_DAYS")).unwrap_or_else(default_retention_days),
                retention_sweep_interval_secs: parse_var(get("TOGGLEBOARD_AUDIT_RETENTION_SWEEP_INTERVAL_SECS"))
                    .unwrap_or(0),
            },
            fanout: FanoutConfig {
                toggle_batch_size: parse_var(get("TOGGLEBOARD_FANOUT_TOGGLE_BATCH_SIZE"))
                    .unwrap_or_else(default_fanout_batch_size),
                toggle_interval_ms: parse_var(get("TOGGLEBOARD_FANOUT_TOGGLE_INTERVAL_MS"))
                    .unwrap_or_else(default_fanout_interval_ms),
                freeze_batch_size: parse_var(get("TOGGLEBOARD_FANOUT_FREEZE_BATCH_SIZE"))
                    .unwrap_or_else(default_fanout_batch_size),
                freeze_interval_ms: parse_var(get("TOGGLEBOARD_FANOUT_FREEZE_INTERVAL_MS"))
                    .unwrap_or_else(default_fanout_interval_ms),
                snapshot_interval_ms: parse_var(get("TOGGLEBOARD_FANOUT_SNAPSHOT_INTERVAL_MS"))
                    .unwrap_or_else(default_snapshot_interval_ms),
                hub_capacity: parse_var(get("TOGGLEBOARD_FANOUT_HUB_CAPACITY")).unwrap_or_else(default_hub_capacity),
                freeze_sweep_interval_secs: parse_var(get("TOGGLEBOARD_FANOUT_FREEZE_SWEEP_INTERVAL_SECS")).unwrap_or(0),
                freeze_sweep_page_size: parse_var(get("TOGGLEBOARD_FANOUT_FREEZE_SWEEP_PAGE_SIZE"))
                    .unwrap_or_else(default_sweep_page_size),
            },
            network: NetworkConfig {
                http_addr: parse_var(get("TOGGLEBOARD_HTTP_ADDR")).unwrap_or_else(default_http_addr),
                trusted_proxy_header: get("TOGGLEBOARD_TRUSTED_PROXY_HEADER")
                    .unwrap_or_else(default_trusted_proxy_header),
                fallback_client_addr: get("TOGGLEBOARD_FALLBACK_CLIENT_ADDR")
                    .unwrap_or_else(default_fallback_client_addr),
            },
            store: StoreConfig {
                redis_url: get("TOGGLEBOARD_REDIS_URL").filter(|url| !url.is_empty()),
                redis_replica_url: get("TOGGLEBOARD_REDIS_REPLICA_URL").filter(|url| !url.is_empty()),
            },
        }
    }

    /// Merge configuration from a higher-precedence source.
    ///
    /// Fields in `other` that are `Some` or differ from their default override `self`.
    pub fn merge(&mut self, other: Self) {
        self.board.merge(other.board);
        self.admission.merge(other.admission);
        self.audit.merge(other.audit);
        self.fanout.merge(other.fanout);
        self.network.merge(other.network);
        self.store.merge(other.store);
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &str); 13] = [
            (self.board.total_cells == 0, "board.total_cells must be non-zero"),
            (self.board.total_cells > MAX_TOTAL_CELLS, "board.total_cells exceeds the addressable bitset range"),
            (self.admission.max_allowed == 0, "admission.max_allowed must be non-zero"),
            (self.admission.unit_size == 0, "admission.unit_size must be non-zero"),
            (self.admission.decay_interval_ms == 0, "admission.decay_interval_ms must be non-zero"),
            (self.admission.mercy_ratio == 0, "admission.mercy_ratio must be non-zero"),
            (self.audit.batch_size == 0, "audit.batch_size must be non-zero"),
            (self.audit.flush_interval_ms == 0, "audit.flush_interval_ms must be non-zero"),
            (self.audit.queue_capacity == 0, "audit.queue_capacity must be non-zero"),
            (
                self.fanout.toggle_batch_size == 0 || self.fanout.freeze_batch_size == 0,
                "fanout batch sizes must be non-zero",
            ),
            (
                self.fanout.toggle_interval_ms == 0 || self.fanout.freeze_interval_ms == 0,
                "fanout intervals must be non-zero",
            ),
            (self.fanout.snapshot_interval_ms == 0, "fanout.snapshot_interval_ms must be non-zero"),
            (self.fanout.hub_capacity == 0, "fanout.hub_capacity must be non-zero"),
        ];
        if let Some((_, message)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(ConfigError::Validation {
                message: (*message).to_string(),
            });
        }
        if self.fanout.freeze_sweep_interval_secs > 0 && self.fanout.freeze_sweep_page_size == 0 {
            return Err(ConfigError::Validation {
                message: "fanout.freeze_sweep_page_size must be non-zero when the sweeper is enabled".to_string(),
            });
        }
        Ok(())
    }

    /// Board parameters for store initialization.
    pub fn board_settings(&self) -> BoardSettings {
        BoardSettings {
            total_cells: self.board.total_cells,
            global_cap: self.board.global_cap,
            freeze_threshold_ms: self.board.freeze_threshold_ms,
            initial_count: self.board.initial_count,
        }
    }

    /// Abuse detector parameters.
    pub fn abuse_config(&self) -> AbuseConfig {
        AbuseConfig {
            max_allowed: self.admission.max_allowed,
            unit_size: self.admission.unit_size,
            decay_interval: Duration::from_millis(self.admission.decay_interval_ms),
            mercy_ratio: self.admission.mercy_ratio,
        }
    }

    /// Audit batcher parameters.
    pub fn audit_settings(&self) -> AuditSettings {
        AuditSettings {
            batch_size: self.audit.batch_size,
            flush_interval: Duration::from_millis(self.audit.flush_interval_ms),
            queue_capacity: self.audit.queue_capacity,
            max_entries_per_day: self.audit.max_entries_per_day,
        }
    }

    /// Toggle pipeline parameters.
    pub fn toggle_batch_settings(&self) -> BatchSettings {
        BatchSettings {
            max_batch: self.fanout.toggle_batch_size,
            interval: Duration::from_millis(self.fanout.toggle_interval_ms),
        }
    }

    /// Freeze pipeline parameters.
    pub fn freeze_batch_settings(&self) -> BatchSettings {
        BatchSettings {
            max_batch: self.fanout.freeze_batch_size,
            interval: Duration::from_millis(self.fanout.freeze_interval_ms),
        }
    }
}

impl BoardConfig {
    fn merge(&mut self, other: Self) {
        if other.total_cells != default_total_cells() {
            self.total_cells = other.total_cells;
        }
        if other.global_cap != default_global_cap() {
            self.global_cap = other.global_cap;
        }
        if other.freeze_threshold_ms != default_freeze_threshold_ms() {
            self.freeze_threshold_ms = other.freeze_threshold_ms;
        }
        if other.initial_count != InitialCount::default() {
            self.initial_count = other.initial_count;
        }
    }
}

impl AdmissionConfig {
    fn merge(&mut self, other: Self) {
        if other.max_allowed != default_max_allowed() {
            self.max_allowed = other.max_allowed;
        }
        if other.unit_size != default_unit_size() {
            self.unit_size = other.unit_size;
        }
        if other.decay_interval_ms != default_decay_interval_ms() {
            self.decay_interval_ms = other.decay_interval_ms;
        }
        if other.mercy_ratio != default_mercy_ratio() {
            self.mercy_ratio = other.mercy_ratio;
        }
    }
}

impl AuditConfig {
    fn merge(&mut self, other: Self) {
        if other.batch_size != default_audit_batch_size() {
            self.batch_size = other.batch_size;
        }
        if other.flush_interval_ms != default_audit_flush_interval_ms() {
            self.flush_interval_ms = other.flush_interval_ms;
        }
        if other.queue_capacity != default_audit_queue_capacity() {
            self.queue_capacity = other.queue_capacity;
        }
        if other.max_entries_per_day != default_max_entries_per_day() {
            self.max_entries_per_day = other.max_entries_per_day;
        }
        if other.retention_days != default_retention_days() {
            self.retention_days = other.retention_days;
        }
        if other.retention_sweep_interval_secs != 0 {
            self.retention_sweep_interval_secs = other.retention_sweep_interval_secs;
        }
    }
}

impl FanoutConfig {
    fn merge(&mut self, other: Self) {
        if other.toggle_batch_size != default_fanout_batch_size() {
            self.toggle_batch_size = other.toggle_batch_size;
        }
        if other.toggle_interval_ms != default_fanout_interval_ms() {
            self.toggle_interval_ms = other.toggle_interval_ms;
        }
        if other.freeze_batch_size != default_fanout_batch_size() {
            self.freeze_batch_size = other.freeze_batch_size;
        }
        if other.freeze_interval_ms != default_fanout_interval_ms() {
            self.freeze_interval_ms = other.freeze_interval_ms;
        }
        if other.snapshot_interval_ms != default_snapshot_interval_ms() {
            self.snapshot_interval_ms = other.snapshot_interval_ms;
        }
        if other.hub_capacity != default_hub_capacity() {
            self.hub_capacity = other.hub_capacity;
        }
        if other.freeze_sweep_interval_secs != 0 {
            self.freeze_sweep_interval_secs = other.freeze_sweep_interval_secs;
        }
        if other.freeze_sweep_page_size != default_sweep_page_size() {
            self.freeze_sweep_page_size = other.freeze_sweep_page_size;
        }
    }
}

impl NetworkConfig {
    fn merge(&mut self, other: Self) {
        if other.http_addr != default_http_addr() {
            self.http_addr = other.http_addr;
        }
        if other.trusted_proxy_header != default_trusted_proxy_header() {
            self.trusted_proxy_header = other.trusted_proxy_header;
        }
        if other.fallback_client_addr != default_fallback_client_addr() {
            self.fallback_client_addr = other.fallback_client_addr;
        }
    }
}

impl StoreConfig {
    fn merge(&mut self, other: Self) {
        if other.redis_url.is_some() {
            self.redis_url = other.redis_url;
        }
        if other.redis_replica_url.is_some() {
            self.redis_replica_url = other.redis_replica_url;
        }
    }
}

/// Load configuration with precedence env < TOML < `apply_overrides`, then validate.
///
/// `apply_overrides` assigns fields directly, so an override equal to a
/// default still wins over a non-default value from the file.
pub fn load_config(
    path: Option<&Path>,
    apply_overrides: impl FnOnce(&mut NodeConfig),
) -> Result<NodeConfig, ConfigError> {
    let mut config = NodeConfig::from_env();
    if let Some(path) = path {
        config.merge(NodeConfig::from_toml_file(path)?);
    }
    apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

// Default value functions
fn default_total_cells() -> u64 {
    DEFAULT_TOTAL_CELLS
}

fn default_global_cap() -> u64 {
    DEFAULT_GLOBAL_CAP
}

fn default_freeze_threshold_ms() -> u64 {
    DEFAULT_FREEZE_THRESHOLD_MS
}

fn default_max_allowed() -> u64 {
    DEFAULT_ABUSE_MAX_ALLOWED
}

fn default_unit_size() -> u64 {
    DEFAULT_ABUSE_UNIT_SIZE
}

fn default_decay_interval_ms() -> u64 {
    DEFAULT_ABUSE_DECAY_INTERVAL_MS
}

fn default_mercy_ratio() -> u64 {
    DEFAULT_ABUSE_MERCY_RATIO
}

fn default_audit_batch_size() -> usize {
    DEFAULT_AUDIT_BATCH_SIZE
}

fn default_audit_flush_interval_ms() -> u64 {
    DEFAULT_AUDIT_FLUSH_INTERVAL_MS
}

fn default_audit_queue_capacity() -> usize {
    DEFAULT_AUDIT_QUEUE_CAPACITY
}

fn default_max_entries_per_day() -> u64 {
    DEFAULT_MAX_AUDIT_ENTRIES_PER_DAY
}

fn default_retention_days() -> u32 {
    DEFAULT_AUDIT_RETENTION_DAYS
}

fn default_fanout_batch_size() -> usize {
    DEFAULT_FANOUT_BATCH_SIZE
}

fn default_fanout_interval_ms() -> u64 {
    DEFAULT_FANOUT_INTERVAL_MS
}

fn default_snapshot_interval_ms() -> u64 {
    DEFAULT_SNAPSHOT_INTERVAL_MS
}

fn default_hub_capacity() -> usize {
    DEFAULT_HUB_CAPACITY
}

fn default_sweep_page_size() -> usize {
    DEFAULT_SWEEP_PAGE_SIZE
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_trusted_proxy_header() -> String {
    DEFAULT_TRUSTED_PROXY_HEADER.to_string()
}

fn default_fallback_client_addr() -> String {
    DEFAULT_FALLBACK_CLIENT_ADDR.to_string()
}

fn parse_var<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value?.trim().parse().ok()
}

fn parse_initial_count(value: &str) -> Option<InitialCount> {
    match value.trim().to_lowercase().as_str() {
        "cap" => Some(InitialCount::Cap),
        "zero" => Some(InitialCount::Zero),
        _ => None,
    }
}

/// Configuration loading and parsing errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.board.total_cells, 1_000_000);
        assert_eq!(config.board.initial_count, InitialCount::Cap);
        assert_eq!(config.network.http_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.network.trusted_proxy_header, "nolen-ip");
        assert!(config.store.redis_url.is_none());
    }

    #[test]
    fn test_validation_rejects_zero_cells() {
        let mut config = NodeConfig::default();
        config.board.total_cells = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_validation_rejects_oversized_board() {
        let mut config = NodeConfig::default();
        config.board.total_cells = MAX_TOTAL_CELLS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_intervals_and_sizes() {
        let mut config = NodeConfig::default();
        config.fanout.toggle_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.audit.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.admission.unit_size = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.admission.mercy_ratio = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TOGGLEBOARD_BOARD_TOTAL_CELLS", "4096"),
            ("TOGGLEBOARD_BOARD_INITIAL_COUNT", "Zero"),
            ("TOGGLEBOARD_ADMISSION_MAX_ALLOWED", "50"),
            ("TOGGLEBOARD_REDIS_URL", "redis://127.0.0.1:6379"),
            ("TOGGLEBOARD_HTTP_ADDR", "127.0.0.1:9000"),
            ("TOGGLEBOARD_FANOUT_SNAPSHOT_INTERVAL_MS", "not-a-number"),
        ]);
        let config = NodeConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.board.total_cells, 4096);
        assert_eq!(config.board.initial_count, InitialCount::Zero);
        assert_eq!(config.admission.max_allowed, 50);
        assert_eq!(config.store.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.network.http_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.fanout.snapshot_interval_ms, DEFAULT_SNAPSHOT_INTERVAL_MS);
    }

    #[test]
    fn test_toml_sections_use_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            [board]
            total_cells = 2048
            initial_count = "zero"

            [fanout]
            snapshot_interval_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.board.total_cells, 2048);
        assert_eq!(config.board.initial_count, InitialCount::Zero);
        assert_eq!(config.board.global_cap, DEFAULT_GLOBAL_CAP);
        assert_eq!(config.fanout.snapshot_interval_ms, 1000);
        assert_eq!(config.fanout.toggle_batch_size, DEFAULT_FANOUT_BATCH_SIZE);
        assert_eq!(config.audit, AuditConfig::default());
    }

    #[test]
    fn test_merge_overrides_non_default_fields() {
        let mut base = NodeConfig::default();
        base.board.total_cells = 512;
        base.store.redis_url = Some("redis://env".into());

        let mut overrides = NodeConfig::default();
        overrides.board.global_cap = 100;
        overrides.network.http_addr = "127.0.0.1:7000".parse().unwrap();
        overrides.store.redis_replica_url = Some("redis://replica".into());

        base.merge(overrides);

        assert_eq!(base.board.total_cells, 512);
        assert_eq!(base.board.global_cap, 100);
        assert_eq!(base.network.http_addr, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(base.store.redis_url.as_deref(), Some("redis://env"));
        assert_eq!(base.store.redis_replica_url.as_deref(), Some("redis://replica"));
    }

    #[test]
    fn test_load_config_toml_then_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[board]\ntotal_cells = 8192\nglobal_cap = 10\n").unwrap();

        let config = load_config(Some(file.path()), |config| config.board.global_cap = 20).unwrap();
        assert_eq!(config.board.total_cells, 8192);
        assert_eq!(config.board.global_cap, 20);
    }

    #[test]
    fn test_load_config_default_valued_override_beats_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[board]\ninitial_count = \"zero\"\nglobal_cap = 10\n").unwrap();

        let config = load_config(Some(file.path()), |config| {
            config.board.initial_count = InitialCount::Cap;
            config.board.global_cap = DEFAULT_GLOBAL_CAP;
        })
        .unwrap();
        assert_eq!(config.board.initial_count, InitialCount::Cap);
        assert_eq!(config.board.global_cap, DEFAULT_GLOBAL_CAP);
    }

    #[test]
    fn test_load_config_validates_overrides() {
        let err = load_config(None, |config| config.board.total_cells = 0).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/toggleboard.toml")), |_| {}).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_settings_conversions() {
        let config = NodeConfig::default();
        assert_eq!(config.board_settings().global_cap, DEFAULT_GLOBAL_CAP);
        assert_eq!(config.abuse_config().decay_interval, Duration::from_millis(DEFAULT_ABUSE_DECAY_INTERVAL_MS));
        assert_eq!(config.audit_settings().queue_capacity, DEFAULT_AUDIT_QUEUE_CAPACITY);
        assert_eq!(config.freeze_batch_settings().max_batch, DEFAULT_FANOUT_BATCH_SIZE);
    }
}
