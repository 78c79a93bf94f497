use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Frames a client sends over the socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    Connect {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Subscribe {
        conversation_id: String,
    },
    Unsubscribe {
        conversation_id: String,
    },
    /// Advisory write; the server re-issues it through the HTTP write path.
    SendMessage {
        conversation_id: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        media_url: Option<String>,
        #[serde(default)]
        media_type: Option<String>,
        #[serde(default)]
        replied_to_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    Ping,
}

/// Frames the server sends over the socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    AuthResponse {
        success: bool,
        message: String,
    },
    Subscribed {
        conversation_id: String,
    },
    Unsubscribed {
        conversation_id: String,
    },
    NewMessage {
        message: Message,
    },
    MessageDeleted {
        message: Message,
    },
    MessagePinned {
        message: Message,
    },
    Pong,
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
            conversation_id: None,
            client_ref: None,
        }
    }

    /// The message carried by a lifecycle event.
    pub fn message(&self) -> Option<&Message> {
        match self {
            ServerEvent::NewMessage { message }
            | ServerEvent::MessageDeleted { message }
            | ServerEvent::MessagePinned { message } => Some(message),
            _ => None,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ServerEvent::Subscribed { conversation_id }
            | ServerEvent::Unsubscribed { conversation_id } => Some(conversation_id),
            ServerEvent::Error {
                conversation_id, ..
            } => conversation_id.as_deref(),
            _ => self.message().map(|m| m.conversation_id.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Validation,
    NotFound,
    Forbidden,
    Unauthorized,
    Unavailable,
    Internal,
}
