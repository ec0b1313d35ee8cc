pub mod connection;

use serde::{Deserialize, Serialize};

/// What a session's socket pump reports back to the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Opened { session: u64 },
    Frame { session: u64, text: String },
    Closed {
        session: u64,
        code: Option<u16>,
        reason: String,
    },
}

/// A decoded inbound frame. Only `type == "message"` frames are acted on.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct InboundMessage {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl InboundMessage {
    pub fn is_message(&self) -> bool {
        self.kind.as_deref() == Some("message")
    }
}

/// The only frame the bridge ever writes to the socket.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundFrame<'a> {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub channel: &'a str,
    pub text: &'a str,
}

impl<'a> OutboundFrame<'a> {
    pub fn message(id: u64, channel: &'a str, text: &'a str) -> Self {
        Self {
            id,
            kind: "message",
            channel,
            text,
        }
    }
}
