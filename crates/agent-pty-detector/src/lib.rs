//! # agent-pty-detector
//!
//! Response-boundary detection for the agent-pty session engine.
//!
//! Interactive CLIs give no explicit end-of-response marker. The engine
//! treats the reappearance of the tool's idle prompt as the boundary, and
//! this crate isolates that fragile, tool-specific coupling behind the
//! [`BoundaryDetector`] trait so it can be swapped or stubbed.
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends only on agent-pty-core
//! and operates on text that has already been stripped of control sequences.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boundary;

// Re-export commonly used types
pub use boundary::{Boundary, BoundaryDetector, PromptPatternDetector, DEFAULT_PROMPT_PATTERN};
