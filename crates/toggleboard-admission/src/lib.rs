//! Admission control for the toggle board.
//!
//! [`ConnectionClassifier`] turns request metadata into a client key and an
//! IPv6 flag; [`AbuseDetector`] scores client keys and soft-throttles the
//! noisy ones.

pub mod abuse;
pub mod classifier;

pub use abuse::AbuseConfig;
pub use abuse::AbuseDetector;
pub use abuse::AbuseStats;
pub use abuse::Admission;
pub use abuse::DecayReport;
pub use classifier::ClassifierError;
pub use classifier::ClientIdentity;
pub use classifier::ConnectionClassifier;
pub use classifier::group_address;
