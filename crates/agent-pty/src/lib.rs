//! agent-pty server library
//!
//! This library contains the engine boundary and the JSON-lines transport.
//! The actual server binary is in main.rs.

pub mod protocol;
pub mod schema;
pub mod server;
pub mod service;

// Re-export commonly used types
pub use protocol::{Command, Request, Response, ResponseBody};
pub use schema::protocol_schema;
pub use server::Server;
pub use service::{Ack, SessionService, StreamEvent};
