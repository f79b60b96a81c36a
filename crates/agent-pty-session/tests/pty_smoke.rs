//! End-to-end checks against a real shell on a real PTY.

#![cfg(unix)]

use agent_pty_core::{EngineConfig, OwnerId, SessionState};
use agent_pty_session::SessionPool;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

fn shell_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.pool.max_sessions = 2;
    let session = &mut config.session;
    session.executable = "/bin/sh".to_string();
    session.working_directory = std::env::temp_dir();
    session.ready_prompt_pattern = r"(?m)[$#] $".to_string();
    session.exit_command = "exit".to_string();
    session.handshake_timeout_secs = 5;
    session.prompt_detection_timeout_secs = 1;
    session.poll_interval_ms = 20;
    config
}

#[tokio::test]
async fn shell_round_trip() {
    let pool = SessionPool::new(&shell_config()).unwrap();
    let owner = OwnerId::new("smoke").unwrap();

    let id = pool.create_session(&owner).await.unwrap();
    let session = pool.get_session(&owner, &id).unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.is_alive());
    assert!(session.process_id().is_some());

    session
        .write("echo agent-pty-$((40 + 2))", &CancellationToken::new())
        .await
        .unwrap();
    let chunks: Vec<String> = session
        .read_response(CancellationToken::new())
        .await
        .unwrap()
        .into_stream()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    let response = chunks.concat();
    assert!(response.contains("agent-pty-42"), "response was {response:?}");
    assert!(!response.contains('\x1b'));
    assert!(!response.contains('\r'));

    assert!(pool.remove_session(&owner, &id).await);
    assert!(!session.is_alive());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn missing_executable_fails_creation() {
    let mut config = shell_config();
    config.session.executable = "/nonexistent/agent-cli".to_string();
    let pool = SessionPool::new(&config).unwrap();

    let result = pool.create_session(&OwnerId::new("smoke").unwrap()).await;
    assert!(result.is_err());
    assert_eq!(pool.active_session_count(), 0);
}
