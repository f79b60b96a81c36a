//! # agent-pty-session
//!
//! Interactive session engine for the agent-pty workspace.
//!
//! This crate provides:
//! - `InteractiveSession`: one AI CLI child on a pseudo-terminal, with a
//!   handshake, serialized writes and boundary-aware streamed reads
//! - `ResponseStream`: the cancellable, finite sequence of response chunks
//! - `SessionPool`: ownership-checked registry with one session per owner,
//!   a global capacity ceiling and a background idle sweep
//! - `testing`: scripted processes for driving sessions without a real CLI
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on agent-pty-core,
//! agent-pty-emulator and agent-pty-detector to manage session lifecycles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod input;
pub mod output;
pub mod pool;
pub mod session;
pub mod testing;

// Re-export commonly used types
pub use input::{sanitize_input, SanitizedInput};
pub use output::ResponseStream;
pub use pool::{SessionPool, SessionPoolBuilder, SessionSummary, SweepReport};
pub use session::InteractiveSession;
