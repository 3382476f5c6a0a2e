//! The core models for a streamed chat transcript.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Approximate token counts attached to an entry once computed.
#[derive(Clone, Default, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<usize>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EntryMetrics>,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            id: new_message_id(),
            role,
            content: content.to_string(),
            metrics: None,
        }
    }

    pub fn user(content: &str, tokens_in: usize) -> Self {
        let mut msg = Self::new(Role::User, content);
        msg.metrics = Some(EntryMetrics {
            tokens_in: Some(tokens_in),
            tokens_out: None,
        });
        msg
    }

    /// An empty assistant entry that a stream will grow into.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, "")
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Append-only, ordered list of entries.
#[derive(Default, Debug, Clone)]
pub struct Transcript(Vec<Message>);

impl Transcript {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn new_with_messages(messages: Vec<Message>) -> Self {
        Self(messages)
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.0
    }

    pub fn push(&mut self, msg: Message) {
        self.0.push(msg)
    }

    pub fn last_mut(&mut self) -> Option<&mut Message> {
        self.0.last_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }
}
