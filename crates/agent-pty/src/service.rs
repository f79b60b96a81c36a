//! Engine boundary used by transports.
//!
//! [`SessionService`] turns the pool and session operations into the four
//! calls a transport needs, and converts a response stream into a channel of
//! [`StreamEvent`]s that can be forwarded as-is.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agent_pty_core::{Error, ErrorKind, OwnerId, Result, SessionId};
use agent_pty_session::SessionPool;

/// Buffered events per in-flight message.
const STREAM_BUFFER: usize = 32;

/// One element of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Plain-text piece of the response
    Chunk {
        /// Text with control sequences removed
        text: String,
    },
    /// The response is complete
    Complete,
    /// The response failed; no further events follow
    Error {
        /// Machine-readable kind
        kind: ErrorKind,
        /// Human-readable description
        message: String,
        /// Whether restarting the session is likely to help
        restartable: bool,
    },
}

impl StreamEvent {
    /// Describe `error` as a terminal stream event.
    pub fn from_error(error: &Error) -> Self {
        let kind = error.kind();
        StreamEvent::Error {
            kind,
            message: error.to_string(),
            restartable: kind.suggests_restart(),
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk { .. })
    }
}

/// Acknowledgement of an end-session request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Ack {
    /// Whether a session was actually removed
    pub removed: bool,
}

/// Session operations exposed to transports.
#[derive(Debug, Clone)]
pub struct SessionService {
    pool: SessionPool,
}

impl SessionService {
    /// Wrap `pool` and start its background sweep.
    pub fn start(pool: SessionPool) -> Self {
        pool.start();
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Create a session for `owner`, replacing any previous one.
    pub async fn start_session(&self, owner: &str) -> Result<SessionId> {
        let owner = OwnerId::new(owner)?;
        self.pool.create_session(&owner).await
    }

    /// Send `prompt` and stream the response.
    ///
    /// Failures before the write reaches the child are returned directly.
    /// Once the message is sent, the outcome arrives on the channel as a
    /// sequence of chunks ending in `Complete` or `Error`. Dropping the
    /// receiver stops the stream.
    pub async fn send_message(
        &self,
        owner: &str,
        session_id: SessionId,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let owner = OwnerId::new(owner)?;
        let session = self.pool.get_session(&owner, &session_id)?;

        session.write(prompt, &cancel).await?;
        let mut reader = session.read_response(cancel).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let mut chunks = 0usize;
            loop {
                let event = match reader.next_chunk().await {
                    Ok(Some(text)) => {
                        chunks += 1;
                        StreamEvent::Chunk { text }
                    }
                    Ok(None) => {
                        pool.touch(&owner, &session_id);
                        StreamEvent::Complete
                    }
                    Err(e) => {
                        warn!("Response failed: id={}, {}", session_id, e);
                        StreamEvent::from_error(&e)
                    }
                };

                let terminal = event.is_terminal();
                if tx.send(event).await.is_err() {
                    debug!("Response receiver dropped: id={}", session_id);
                    break;
                }
                if terminal {
                    break;
                }
            }
            debug!("Response stream ended: id={}, {} chunks", session_id, chunks);
        });

        Ok(rx)
    }

    /// Remove the owner's session.
    pub async fn end_session(&self, owner: &str, session_id: SessionId) -> Result<Ack> {
        let owner = OwnerId::new(owner)?;
        let removed = self.pool.remove_session(&owner, &session_id).await;
        info!("End session: owner={}, id={}, removed={}", owner, session_id, removed);
        Ok(Ack { removed })
    }

    /// Number of live sessions.
    pub fn active_session_count(&self) -> usize {
        self.pool.active_session_count()
    }

    /// Dispose every session and stop the sweep.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_from_error() {
        let event = StreamEvent::from_error(&Error::ProcessExited("exit code 1".to_string()));
        match event {
            StreamEvent::Error {
                kind,
                message,
                restartable,
            } => {
                assert_eq!(kind, ErrorKind::ProcessExitedUnexpectedly);
                assert!(message.contains("exit code 1"));
                assert!(restartable);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event = StreamEvent::from_error(&Error::PromptTooLong { len: 11, max: 10 });
        assert!(matches!(
            event,
            StreamEvent::Error {
                kind: ErrorKind::PromptTooLong,
                restartable: false,
                ..
            }
        ));
    }

    #[test]
    fn test_stream_event_serialization() {
        let json = serde_json::to_value(StreamEvent::Chunk {
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "chunk", "text": "hi"}));

        let json = serde_json::to_value(StreamEvent::Complete).unwrap();
        assert_eq!(json, serde_json::json!({"type": "complete"}));
    }

    #[test]
    fn test_terminal_events() {
        assert!(!StreamEvent::Chunk {
            text: String::new()
        }
        .is_terminal());
        assert!(StreamEvent::Complete.is_terminal());
        assert!(StreamEvent::from_error(&Error::Cancelled).is_terminal());
    }
}
