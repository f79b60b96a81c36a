//! Configuration types for the agent-pty session engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Dimensions, Error};

/// Engine configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Process-level settings
    pub server: ServerSettings,
    /// Session pool settings
    pub pool: PoolSettings,
    /// Per-session settings
    pub session: SessionSettings,
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        self.pool.validate()?;
        self.session.validate()
    }
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Session pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of live sessions across all owners
    pub max_sessions: usize,
    /// Sessions idle longer than this are evicted by the sweep
    pub idle_timeout_minutes: u64,
    /// Interval between background sweeps
    pub sweep_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            idle_timeout_minutes: 15,
            sweep_interval_secs: 60,
        }
    }
}

impl PoolSettings {
    /// Idle eviction threshold.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }

    /// Background sweep cadence.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate pool settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_sessions == 0 {
            return Err(Error::Config("pool.max_sessions must be > 0".to_string()));
        }
        if self.idle_timeout_minutes == 0 {
            return Err(Error::Config(
                "pool.idle_timeout_minutes must be > 0".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "pool.sweep_interval_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-session settings: the external CLI and how its output is delimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Executable spawned for every session (invoked with no arguments)
    pub executable: String,
    /// Repository root used as the child's working directory
    pub working_directory: PathBuf,
    /// PTY rows
    pub rows: u16,
    /// PTY columns
    pub cols: u16,
    /// TERM environment variable value
    pub term: String,
    /// Regex matched against filtered output to detect the idle prompt
    pub ready_prompt_pattern: String,
    /// Seconds without new output after which a response is considered complete
    pub prompt_detection_timeout_secs: u64,
    /// Read loop cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum input length in characters
    pub max_prompt_length: usize,
    /// Upper bound on the initial handshake
    pub handshake_timeout_secs: u64,
    /// Buffered characters that force an intermediate chunk
    pub chunk_threshold: usize,
    /// Consecutive empty polls after which a read gives up
    pub empty_poll_limit: u32,
    /// Command that makes the CLI exit; sent on dispose, refused as input
    pub exit_command: String,
    /// Appended to every message written to the child
    pub line_terminator: String,
    /// How long dispose waits for a graceful exit before killing
    pub graceful_exit_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            working_directory: PathBuf::from("."),
            rows: 40,
            cols: 120,
            term: "xterm-256color".to_string(),
            ready_prompt_pattern: r"(?m)^>\s?$".to_string(),
            prompt_detection_timeout_secs: 3,
            poll_interval_ms: 100,
            max_prompt_length: 10_000,
            handshake_timeout_secs: 30,
            chunk_threshold: 512,
            empty_poll_limit: 600,
            exit_command: "/exit".to_string(),
            line_terminator: "\r".to_string(),
            graceful_exit_timeout_ms: 500,
        }
    }
}

impl SessionSettings {
    /// PTY size.
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.rows, self.cols)
    }

    /// Idle-timeout fallback for response completion.
    pub fn prompt_detection_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_detection_timeout_secs)
    }

    /// Read loop cadence.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Initial handshake bound.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Graceful shutdown wait during dispose.
    pub fn graceful_exit_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_exit_timeout_ms)
    }

    /// Validate session settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.executable.trim().is_empty() {
            return Err(Error::Config(
                "session.executable cannot be empty".to_string(),
            ));
        }
        if !self.dimensions().is_valid() {
            return Err(Error::Config(
                "session.rows and session.cols must be > 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "session.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.max_prompt_length == 0 || self.chunk_threshold == 0 || self.empty_poll_limit == 0
        {
            return Err(Error::Config(
                "session.max_prompt_length, chunk_threshold and empty_poll_limit must be > 0"
                    .to_string(),
            ));
        }
        regex::Regex::new(&self.ready_prompt_pattern).map_err(|e| {
            Error::Config(format!(
                "invalid ready_prompt_pattern '{}': {e}",
                self.ready_prompt_pattern
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.pool.max_sessions, 10);
        assert_eq!(config.pool.idle_timeout(), Duration::from_secs(900));
        assert_eq!(config.session.chunk_threshold, 512);
        assert_eq!(config.session.dimensions(), Dimensions::new(40, 120));
    }

    #[test]
    fn test_config_validation() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_max_sessions() {
        let mut config = EngineConfig::default();
        config.pool.max_sessions = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_dimensions() {
        let mut config = EngineConfig::default();
        config.session.rows = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_executable() {
        let mut config = EngineConfig::default();
        config.session.executable = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  log_level: debug

pool:
  max_sessions: 4
  idle_timeout_minutes: 20
  sweep_interval_secs: 30

session:
  executable: /usr/local/bin/claude
  working_directory: /srv/repo
  rows: 30
  cols: 100
  ready_prompt_pattern: '(?m)^❯\s*$'
  poll_interval_ms: 50
  max_prompt_length: 2000
"#;

        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.pool.max_sessions, 4);
        assert_eq!(config.pool.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.session.executable, "/usr/local/bin/claude");
        assert_eq!(config.session.working_directory, PathBuf::from("/srv/repo"));
        assert_eq!(config.session.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.session.max_prompt_length, 2000);
        // Unset fields keep their defaults
        assert_eq!(config.session.exit_command, "/exit");
        assert_eq!(config.session.chunk_threshold, 512);
    }

    #[test]
    fn test_example_file_matches_defaults() {
        let yaml = include_str!("../../../agent-pty.example.yaml");
        let config = EngineConfig::from_yaml(yaml).unwrap();
        let defaults = EngineConfig::default();
        assert_eq!(config.session.line_terminator, "\r");
        assert_eq!(
            config.session.ready_prompt_pattern,
            defaults.session.ready_prompt_pattern
        );
        assert_eq!(config.pool.max_sessions, defaults.pool.max_sessions);
    }

    #[test]
    fn test_invalid_regex_pattern() {
        let yaml = r#"
session:
  ready_prompt_pattern: "([unclosed"
"#;

        let result = EngineConfig::from_yaml(yaml);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = EngineConfig::from_yaml("pool: [not, a, map]");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
