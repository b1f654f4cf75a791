//! Wire message model shared by both ends of a connection.
//!
//! Every frame on the wire carries exactly one [`Message`]. The set of kinds
//! is closed: a call naming an action pattern, a successful result, or an
//! error reply. Replies are correlated to their call by `id`, which is unique
//! within the lifetime of one logical connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One unit of the wire protocol.
///
/// Serialized as a JSON object with a `"kind"` tag:
///
/// ```json
/// {"kind":"call","id":"…","pattern":"c:1","body":{"d":0}}
/// {"kind":"result","id":"…","body":{"s":"1-0"}}
/// {"kind":"error","id":"…","message":"seneca: Action c:1 failed: boom."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    /// A request naming an action pattern, awaiting a reply with the same id.
    Call {
        id: Uuid,
        pattern: String,
        body: Value,
    },
    /// A successful reply to the call with the same id.
    Result { id: Uuid, body: Value },
    /// A failed reply to the call with the same id. `message` carries the
    /// standardized action-error envelope; receiving one never closes the
    /// connection.
    Error { id: Uuid, message: String },
}

impl Message {
    /// Builds a new `Call` with a freshly generated correlation id.
    pub fn call(pattern: impl Into<String>, body: Value) -> Self {
        Message::Call {
            id: Uuid::new_v4(),
            pattern: pattern.into(),
            body,
        }
    }

    /// The correlation id of this message.
    pub fn id(&self) -> Uuid {
        match self {
            Message::Call { id, .. } | Message::Result { id, .. } | Message::Error { id, .. } => {
                *id
            }
        }
    }

    /// The kind discriminant, for logging.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Call { .. } => MessageKind::Call,
            Message::Result { .. } => MessageKind::Result,
            Message::Error { .. } => MessageKind::Error,
        }
    }

    /// True for `Result` and `Error`, the two kinds that settle a pending call.
    pub fn is_reply(&self) -> bool {
        !matches!(self, Message::Call { .. })
    }
}

/// Discriminant of a [`Message`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Call,
    Result,
    Error,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::Call => "call",
            MessageKind::Result => "result",
            MessageKind::Error => "error",
        };
        f.write_str(s)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
