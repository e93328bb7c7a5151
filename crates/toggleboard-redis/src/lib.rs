//! Redis backend for the toggle board.
//!
//! The toggle, sweeper-freeze and counter-repair transactions are Lua scripts
//! so each runs atomically on the server. The change feed is Redis pub/sub.

pub mod scripts;
mod store;

pub use store::DEFAULT_OPERATION_TIMEOUT;
pub use store::RedisBoardStore;
pub use store::map_redis_error;
pub use store::parse_toggle_reply;
