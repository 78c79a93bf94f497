//! Reducer for the message view of the focused conversation.
//!
//! History pages, HTTP write confirmations and socket events all funnel
//! through [`ChatView::reduce`]. Each call returns a fresh view, so callers can
//! keep the previous state around for diffing.

use huddle_proto::{ErrorCode, Message, MessagePage, ServerEvent};

use crate::timeline::Timeline;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Live,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// Switch to another conversation; clears the timeline
    Focus(String),
    HistoryLoaded {
        conversation_id: String,
        page: MessagePage,
    },
    /// Entity returned by a successful HTTP write
    WriteConfirmed(Message),
    Socket(ServerEvent),
    Disconnected,
    Reconnected,
}

/// A socket error addressed to this view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewError {
    pub code: ErrorCode,
    pub message: String,
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatView {
    conversation_id: Option<String>,
    timeline: Timeline,
    needs_catch_up: bool,
    connection: ConnectionStatus,
    last_error: Option<ViewError>,
}

impl ChatView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focused(conversation_id: &str) -> Self {
        Self::new().reduce(ViewEvent::Focus(conversation_id.to_string()))
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        self.timeline.messages()
    }

    pub fn pinned(&self) -> Vec<&Message> {
        self.timeline.pinned().collect()
    }

    /// Set when live events may have been missed; a history load clears it.
    pub fn needs_catch_up(&self) -> bool {
        self.needs_catch_up
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn last_error(&self) -> Option<&ViewError> {
        self.last_error.as_ref()
    }

    pub fn reduce(&self, event: ViewEvent) -> ChatView {
        let mut next = self.clone();
        next.apply(event);
        next
    }

    fn apply(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::Focus(conversation_id) => {
                if self.conversation_id.as_deref() != Some(conversation_id.as_str()) {
                    self.conversation_id = Some(conversation_id);
                    self.timeline = Timeline::new();
                    self.last_error = None;
                    self.needs_catch_up = true;
                }
            }
            ViewEvent::HistoryLoaded {
                conversation_id,
                page,
            } => {
                if self.is_focused(&conversation_id) {
                    self.timeline.extend(page.messages);
                    self.needs_catch_up = false;
                }
            }
            ViewEvent::WriteConfirmed(message) => self.upsert(message),
            ViewEvent::Socket(event) => self.apply_socket(event),
            ViewEvent::Disconnected => {
                self.connection = ConnectionStatus::Disconnected;
                self.needs_catch_up = true;
            }
            ViewEvent::Reconnected => {
                self.connection = ConnectionStatus::Live;
                self.needs_catch_up = true;
            }
        }
    }

    fn apply_socket(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage { message }
            | ServerEvent::MessageDeleted { message }
            | ServerEvent::MessagePinned { message } => self.upsert(message),
            ServerEvent::Subscribed { conversation_id } => {
                if self.is_focused(&conversation_id) {
                    self.connection = ConnectionStatus::Live;
                }
            }
            ServerEvent::Error {
                code,
                message,
                conversation_id,
                client_ref,
            } => {
                if conversation_id.as_deref().map_or(true, |id| self.is_focused(id)) {
                    self.last_error = Some(ViewError {
                        code,
                        message,
                        client_ref,
                    });
                }
            }
            ServerEvent::AuthResponse { .. } | ServerEvent::Unsubscribed { .. } | ServerEvent::Pong => {}
        }
    }

    fn upsert(&mut self, message: Message) {
        if self.is_focused(&message.conversation_id) {
            self.timeline.upsert(message);
        }
    }

    fn is_focused(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }
}
