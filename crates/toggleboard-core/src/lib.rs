//! Core of the toggle board engine.
//!
//! The board is a fixed array of cells shared by every connected client. Each
//! cell is unchecked, checked, or permanently frozen, and two counters track
//! the population of the checkbox and frozen bitsets. This crate holds:
//!
//! - [`pure`]: the toggle state machine and the admission, sweep and audit
//!   arithmetic, free of I/O
//! - [`BoardStore`]: the atomic store interface every backend implements
//! - [`InMemoryBoardStore`]: the in-process backend used as a fallback and in tests
//! - wire types for the change feed and snapshots

pub mod bitset;
pub mod constants;
pub mod error;
pub mod feed;
pub mod inmemory;
pub mod pure;
pub mod time;
pub mod traits;
pub mod types;

pub use bitset::Bitset;
pub use error::StoreError;
pub use error::ValidationError;
pub use feed::FeedSubscription;
pub use feed::decode_feed_payload;
pub use inmemory::InMemoryBoardStore;
pub use time::SimulatedTimeProvider;
pub use time::SystemTimeProvider;
pub use time::TimeProvider;
pub use traits::BoardStore;
pub use types::AuditRecord;
pub use types::AuditTag;
pub use types::BoardSettings;
pub use types::BoardSnapshot;
pub use types::BoardState;
pub use types::FeedTopic;
pub use types::FreezeEvent;
pub use types::InitialCount;
pub use types::LastCheckedPage;
pub use types::ToggleEvent;
pub use types::ToggleOutcome;
