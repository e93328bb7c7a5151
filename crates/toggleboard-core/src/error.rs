//! Error types for board operations.

use snafu::Snafu;

/// Errors from a [`BoardStore`](crate::BoardStore) backend.
///
/// Every variant means the attempted operation did not happen; the store's
/// transactions either run completely or not at all.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The backing store could not be reached.
    #[snafu(display("store unavailable: {reason}"))]
    Unavailable {
        /// What failed.
        reason: String,
    },

    /// The store did not answer in time.
    #[snafu(display("store operation '{operation}' timed out after {duration_ms}ms"))]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// How long we waited.
        duration_ms: u64,
    },

    /// A stored value could not be interpreted.
    #[snafu(display("corrupted value in key '{key}': {reason}"))]
    CorruptedValue {
        /// The key holding the value.
        key: String,
        /// Description of what went wrong.
        reason: String,
    },

    /// A server-side script failed or returned an unexpected shape.
    #[snafu(display("script '{script}' failed: {reason}"))]
    Script {
        /// Name of the script.
        script: String,
        /// Failure description.
        reason: String,
    },

    /// A feed payload could not be encoded or decoded.
    #[snafu(display("feed payload error on '{topic}': {source}"))]
    Serialization {
        /// Feed topic.
        topic: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The change feed subscription ended.
    #[snafu(display("feed '{topic}' closed"))]
    FeedClosed {
        /// Feed topic.
        topic: String,
    },
}

/// Rejections of malformed client input.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ValidationError {
    /// Index outside `0..total`.
    #[snafu(display("index {index} out of range for board of {total} cells"))]
    IndexOutOfRange {
        /// The requested index.
        index: i64,
        /// Board size.
        total: u64,
    },

    /// Payload did not have the expected shape.
    #[snafu(display("malformed payload: {reason}"))]
    MalformedPayload {
        /// Description of what was wrong.
        reason: String,
    },
}

/// Result alias for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::Timeout {
            operation: "apply_toggle".to_string(),
            duration_ms: 250,
        };
        assert_eq!(err.to_string(), "store operation 'apply_toggle' timed out after 250ms");

        let err = StoreError::FeedClosed {
            topic: "bit_toggle_channel".to_string(),
        };
        assert_eq!(err.to_string(), "feed 'bit_toggle_channel' closed");
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError::IndexOutOfRange { index: -1, total: 10 };
        assert_eq!(err.to_string(), "index -1 out of range for board of 10 cells");
    }
}
