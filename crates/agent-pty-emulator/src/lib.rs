//! # agent-pty-emulator
//!
//! Terminal plumbing for the agent-pty session engine.
//!
//! This crate provides:
//! - PTY (pseudo-terminal) process lifecycle management
//! - A process seam (`ProcessSpawner` / `ProcessIo`) so sessions can run
//!   against scripted processes in tests
//! - A streaming ANSI/VT control-sequence filter built on the VTE parser
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on agent-pty-core
//! and provides the process and output primitives sessions are built from.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod filter;
pub mod process;
pub mod pty;

// Re-export commonly used types
pub use filter::{strip_control_sequences, AnsiFilter};
pub use process::{ProcessEvent, ProcessIo, ProcessSpawner, SpawnRequest, SpawnedProcess};
pub use pty::{PtyHandle, PtySpawner};
