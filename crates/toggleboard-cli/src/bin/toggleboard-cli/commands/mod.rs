//! Command implementations.

pub mod board;
pub mod freeze;
pub mod logs;
