use actix::Message;
use chrono::Local;
use serde::{Deserialize, Serialize};

/// Frame a chat client sends over `/ws`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(default)]
    pub prompt: String,
    pub model: Option<String>,
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub clear_context: bool,
    #[serde(default)]
    pub create_new_conversation: bool,
    #[serde(default)]
    pub enable_thinking: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ClientFrame {
    pub fn is_ping(&self) -> bool {
        self.kind.as_deref() == Some("ping")
    }
}

/// Frame the server sends on `/ws`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub text: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
}

impl ServerFrame {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
            error: None,
            conversation_id: None,
        }
    }

    pub fn done(conversation_id: Option<i64>) -> Self {
        Self {
            text: String::new(),
            done: true,
            error: None,
            conversation_id,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            done: true,
            error: Some(message.into()),
            conversation_id: None,
        }
    }

    /// A refused request that leaves any turn in flight running, so `done` stays false.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            done: false,
            ..Self::error(message)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomMessageKind {
    Message,
    Join,
    Leave,
    System,
}

/// One line of the public chat room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    pub username: String,
    pub content: String,
    pub time: String,
    #[serde(rename = "type")]
    pub kind: RoomMessageKind,
}

impl RoomMessage {
    pub fn new(kind: RoomMessageKind, username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            content: content.into(),
            time: Local::now().format("%H:%M:%S").to_string(),
            kind,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(RoomMessageKind::System, "system", content)
    }
}

#[derive(Debug, Deserialize)]
pub struct RoomInbound {
    #[serde(default)]
    pub content: String,
}

/// Text pushed to a session actor from outside its own stream.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Outbound(pub String);
