//! Huddle wire protocol
//!
//! Types shared between the Huddle server and its clients: the persisted
//! conversation/message shapes, the socket frames exchanged in both directions,
//! and the validated request bodies of the HTTP write surface.

mod frames;
pub mod input;
mod models;

pub use frames::{ClientCommand, ErrorCode, ServerEvent};
pub use models::{
    Conversation, ConversationSummary, MediaRef, Message, MessagePage, ReplySnapshot,
    ATTACHMENT_PREVIEW, DELETED_PLACEHOLDER, GENERAL_CHAT_NAME,
};

/// HTTP header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";
