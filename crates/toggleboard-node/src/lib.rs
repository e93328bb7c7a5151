//! Toggle board node.
//!
//! Ties the engine crates together into one process: layered configuration,
//! the [`ToggleService`] used by connection handlers, supervised background
//! tasks, maintenance jobs and the axum HTTP/WebSocket server.

pub mod config;
pub mod maintenance;
pub mod node;
pub mod server;
pub mod service;
pub mod supervisor;
pub mod telemetry;

pub use config::ConfigError;
pub use config::NodeConfig;
pub use config::load_config;
pub use node::BoardNode;
pub use node::NodeError;
pub use node::open_store;
pub use server::AppState;
pub use server::ServerError;
pub use service::ToggleError;
pub use service::ToggleService;
pub use supervisor::Supervisor;
