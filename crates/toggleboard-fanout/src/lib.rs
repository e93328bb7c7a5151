//! Outbound side of the toggle board.
//!
//! Change-feed events are coalesced by the [`BatchPipeline`]s and pushed to
//! viewers through the [`ViewerHub`]. The [`SnapshotPublisher`] periodically
//! sends the full board, and the [`AuditLogBatcher`] writes accepted mutations
//! to the daily audit lists.

pub mod audit;
pub mod batch;
pub mod hub;
pub mod pipeline;
pub mod snapshot;

pub use audit::AuditLogBatcher;
pub use audit::AuditSettings;
pub use audit::AuditSink;
pub use batch::Coalescer;
pub use batch::FreezeBatch;
pub use batch::PendingFreezes;
pub use batch::PendingToggles;
pub use batch::ToggleBatch;
pub use hub::BoardEvent;
pub use hub::Frame;
pub use hub::ViewerHub;
pub use hub::ViewerSubscription;
pub use pipeline::BatchPipeline;
pub use pipeline::BatchSettings;
pub use pipeline::FreezePipeline;
pub use pipeline::TogglePipeline;
pub use snapshot::SnapshotPublisher;
pub use snapshot::capture_snapshot;
