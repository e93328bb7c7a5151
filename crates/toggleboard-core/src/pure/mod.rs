//! Pure, deterministic board logic.
//!
//! Nothing in here performs I/O or reads the clock; callers pass time and
//! randomness in explicitly. The store backends and services build on these
//! functions.

pub mod admission;
pub mod audit;
pub mod sweep;
pub mod toggle;

pub use admission::decay_amount;
pub use admission::decayed_score;
pub use admission::pass_probability;
pub use admission::should_admit;
pub use audit::audit_day;
pub use audit::audit_key;
pub use audit::format_entry;
pub use audit::is_expired;
pub use audit::parse_audit_key;
pub use sweep::sweep_cutoff_ms;
pub use sweep::sweep_eligible;
pub use toggle::CellState;
pub use toggle::ToggleRead;
pub use toggle::Transition;
pub use toggle::freeze_due;
pub use toggle::next_transition;
pub use toggle::validate_index;
