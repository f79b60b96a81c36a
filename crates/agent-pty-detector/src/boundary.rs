//! Boundary detector trait and the regex prompt detector.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use agent_pty_core::{Error, Result};

/// Prompt pattern used when none is configured: a line holding only `>`.
pub const DEFAULT_PROMPT_PATTERN: &str = r"(?m)^>\s?$";

lazy_static! {
    static ref DEFAULT_PROMPT: Regex =
        Regex::new(DEFAULT_PROMPT_PATTERN).expect("default prompt pattern is valid");
}

/// Location of a detected prompt inside a text buffer (byte offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    /// First byte of the prompt
    pub start: usize,
    /// One past the last byte of the prompt
    pub end: usize,
}

impl Boundary {
    /// Text preceding the prompt.
    pub fn before<'a>(&self, text: &'a str) -> &'a str {
        &text[..self.start]
    }
}

/// Finds the point where the external tool is idle and waiting for input.
pub trait BoundaryDetector: Send + Sync + std::fmt::Debug {
    /// Detector name for debugging/logging.
    fn name(&self) -> &'static str;

    /// Locate the ready prompt in `text`, which is already free of control
    /// sequences. Returns the earliest match.
    fn find_prompt(&self, text: &str) -> Option<Boundary>;

    /// Whether `text` contains the ready prompt.
    fn is_ready(&self, text: &str) -> bool {
        self.find_prompt(text).is_some()
    }
}

/// Detects the prompt with a configured regular expression.
#[derive(Debug, Clone)]
pub struct PromptPatternDetector {
    pattern: Regex,
}

impl PromptPatternDetector {
    /// Compile a detector from a pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            Error::Config(format!("invalid ready_prompt_pattern '{pattern}': {e}"))
        })?;
        debug!("Compiled ready prompt pattern: {}", pattern.as_str());
        Ok(Self { pattern })
    }

    /// The pattern source.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Default for PromptPatternDetector {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PROMPT.clone(),
        }
    }
}

impl BoundaryDetector for PromptPatternDetector {
    fn name(&self) -> &'static str {
        "prompt_pattern"
    }

    fn find_prompt(&self, text: &str) -> Option<Boundary> {
        self.pattern.find(text).map(|m| Boundary {
            start: m.start(),
            end: m.end(),
        })
    }
}
