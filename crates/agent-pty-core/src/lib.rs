//! # agent-pty-core
//!
//! Core types for the agent-pty session engine.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other agent-pty crates. It provides:
//!
//! - Identity types (SessionId, OwnerId) and the session state machine
//! - Terminal dimensions
//! - Error taxonomy with machine-distinguishable kinds
//! - YAML configuration for the pool and its sessions
//! - An injectable clock for activity tracking
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other agent-pty crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod geometry;
pub mod session;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, PoolSettings, ServerSettings, SessionSettings};
pub use error::{Error, ErrorKind, Result};
pub use geometry::Dimensions;
pub use session::{OwnerId, SessionId, SessionState};
