//! JSON-lines wire types.
//!
//! Every request is one JSON object on one line, carrying a client-chosen
//! `id` and a `type`. Every response line echoes the `id` of the request it
//! belongs to; a `send_message` request produces several lines (chunks, then
//! `complete` or `error`).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use agent_pty_core::{Error, ErrorKind, SessionId};

use crate::service::{Ack, StreamEvent};

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Request {
    /// Client-chosen identifier echoed in every response
    pub id: String,

    /// The operation to perform
    #[serde(flatten)]
    pub command: Command,
}

/// Operations a client can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Create (or replace) the owner's session
    StartSession {
        /// Caller identity
        owner: String,
    },

    /// Send a prompt and stream the reply
    SendMessage {
        /// Caller identity
        owner: String,
        /// Session to talk to
        session_id: SessionId,
        /// Message text
        prompt: String,
    },

    /// Cancel an in-flight `send_message`
    Cancel {
        /// Id of the request to cancel
        request_id: String,
    },

    /// Dispose the owner's session
    EndSession {
        /// Caller identity
        owner: String,
        /// Session to end
        session_id: SessionId,
    },

    /// Report the number of live sessions
    Count,
}

/// A server response line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Response {
    /// Id of the originating request; absent when the request was unreadable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Response payload
    #[serde(flatten)]
    pub body: ResponseBody,
}

/// Response payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Session created
    SessionStarted {
        /// New session id
        session_id: SessionId,
    },

    /// Piece of a streamed reply
    Chunk {
        /// Plain text
        text: String,
    },

    /// Streamed reply finished
    Complete,

    /// Result of `end_session`
    SessionEnded {
        /// Whether a session was removed
        removed: bool,
    },

    /// Result of `cancel`
    CancelRequested {
        /// Whether the request was still in flight
        found: bool,
    },

    /// Result of `count`
    Count {
        /// Live sessions
        active_sessions: usize,
    },

    /// Request failed
    Error {
        /// Machine-readable kind
        kind: ErrorKind,
        /// Human-readable description
        message: String,
        /// Whether restarting the session is likely to help
        restartable: bool,
    },
}

impl Response {
    /// Response to request `id`.
    pub fn new(id: impl Into<String>, body: ResponseBody) -> Self {
        Self {
            id: Some(id.into()),
            body,
        }
    }

    /// Error response to request `id`.
    pub fn error(id: Option<String>, error: &Error) -> Self {
        Self {
            id,
            body: ResponseBody::from(StreamEvent::from_error(error)),
        }
    }
}

impl From<StreamEvent> for ResponseBody {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Chunk { text } => ResponseBody::Chunk { text },
            StreamEvent::Complete => ResponseBody::Complete,
            StreamEvent::Error {
                kind,
                message,
                restartable,
            } => ResponseBody::Error {
                kind,
                message,
                restartable,
            },
        }
    }
}

impl From<Ack> for ResponseBody {
    fn from(ack: Ack) -> Self {
        ResponseBody::SessionEnded {
            removed: ack.removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start_session() {
        let request: Request =
            serde_json::from_str(r#"{"id":"1","type":"start_session","owner":"alice"}"#).unwrap();
        assert_eq!(request.id, "1");
        assert_eq!(
            request.command,
            Command::StartSession {
                owner: "alice".to_string()
            }
        );
    }

    #[test]
    fn test_parse_send_message() {
        let id = SessionId::new();
        let line = json!({
            "id": "7",
            "type": "send_message",
            "owner": "alice",
            "session_id": id.to_string(),
            "prompt": "explain main.rs",
        });
        let request: Request = serde_json::from_value(line).unwrap();
        assert_eq!(
            request.command,
            Command::SendMessage {
                owner: "alice".to_string(),
                session_id: id,
                prompt: "explain main.rs".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_count_and_cancel() {
        let request: Request = serde_json::from_str(r#"{"id":"2","type":"count"}"#).unwrap();
        assert_eq!(request.command, Command::Count);

        let request: Request =
            serde_json::from_str(r#"{"id":"3","type":"cancel","request_id":"7"}"#).unwrap();
        assert_eq!(
            request.command,
            Command::Cancel {
                request_id: "7".to_string()
            }
        );
    }

    #[test]
    fn test_reject_bad_session_id() {
        let result: std::result::Result<Request, _> = serde_json::from_str(
            r#"{"id":"1","type":"end_session","owner":"a","session_id":"nope"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_responses() {
        let json = serde_json::to_value(Response::new(
            "9",
            ResponseBody::Chunk {
                text: "hello".to_string(),
            },
        ))
        .unwrap();
        assert_eq!(json, json!({"id": "9", "type": "chunk", "text": "hello"}));

        let json = serde_json::to_value(Response::error(None, &Error::InvalidOwner)).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "error",
                "kind": "invalid_owner",
                "message": "Owner id must not be empty",
                "restartable": false,
            })
        );
    }

    #[test]
    fn test_ack_conversion() {
        assert_eq!(
            ResponseBody::from(Ack { removed: true }),
            ResponseBody::SessionEnded { removed: true }
        );
    }
}
