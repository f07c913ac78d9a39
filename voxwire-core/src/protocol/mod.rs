//! Realtime wire protocol: JSON messages of the form
//! `{ "event_id": ..., "type": ..., ...fields }` over a WebSocket.
//!
//! - [`inbound`]: the [`Event`] union the service sends, plus the allow-list parser.
//! - [`outbound`]: [`ClientEvent`] bodies wrapped in an [`OutboundMessage`] envelope.
//! - [`session`]: [`SessionOptions`] and the `session.update` payload built from it.

pub mod inbound;
pub mod outbound;
pub mod session;

pub use inbound::{parse_event, parse_frame, Event, KNOWN_EVENT_TYPES};
pub use outbound::{ClientEvent, OutboundItem, OutboundMessage};
pub use session::{ConnectionTarget, SessionOptions};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fresh outbound event id, `event_<32 hex chars>`. Never repeats within a process.
pub fn generate_event_id() -> String {
    format!("event_{}", Uuid::new_v4().simple())
}

/// Conversation role of a message or output chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
