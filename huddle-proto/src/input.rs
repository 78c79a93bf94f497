//! Request bodies with garde validation.
//!
//! These cover the shape of incoming data only. Rules that need the database
//! (reply targets, membership) live in the server's store.

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::MediaRef;

pub const MAX_USER_ID_LENGTH: usize = 128;
pub const MAX_ID_LENGTH: usize = 64;
pub const MAX_PARTICIPANTS: usize = 256;
pub const MAX_CONVERSATION_NAME_LENGTH: usize = 100;
pub const MAX_MESSAGE_LENGTH: usize = 10000;
pub const MAX_MEDIA_URL_LENGTH: usize = 2048;
pub const MAX_PAGE_SIZE: u32 = 200;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// `type/subtype`, both parts non-empty and free of whitespace
fn validate_media_type(value: &Option<String>, _ctx: &()) -> garde::Result {
    let Some(mime) = value else {
        return Ok(());
    };
    match mime.split_once('/') {
        Some((kind, subtype))
            if !kind.is_empty()
                && !subtype.is_empty()
                && !mime.chars().any(char::is_whitespace)
                && !subtype.contains('/') =>
        {
            Ok(())
        }
        _ => Err(garde::Error::new("Invalid media type")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[garde(context(()))]
pub struct CreateConversationInput {
    #[garde(length(min = 1, max = MAX_PARTICIPANTS), inner(length(min = 1, max = MAX_USER_ID_LENGTH)))]
    pub participant_ids: Vec<String>,
    #[serde(default)]
    #[garde(length(min = 1, max = MAX_CONVERSATION_NAME_LENGTH))]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[garde(context(()))]
pub struct RenameConversationInput {
    #[serde(default)]
    #[garde(length(min = 1, max = MAX_CONVERSATION_NAME_LENGTH))]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[garde(context(()))]
pub struct SendMessageInput {
    #[garde(length(min = 1, max = MAX_ID_LENGTH))]
    pub conversation_id: String,
    #[serde(default)]
    #[garde(length(chars, max = MAX_MESSAGE_LENGTH))]
    pub content: Option<String>,
    #[serde(default)]
    #[garde(length(min = 1, max = MAX_MEDIA_URL_LENGTH))]
    pub media_url: Option<String>,
    #[serde(default)]
    #[garde(custom(validate_media_type))]
    pub media_type: Option<String>,
    #[serde(default)]
    #[garde(length(min = 1, max = MAX_ID_LENGTH))]
    pub replied_to_id: Option<String>,
}

impl SendMessageInput {
    /// Content with surrounding whitespace removed; blank counts as absent.
    pub fn normalized_content(&self) -> Option<String> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(String::from)
    }

    /// The media pair, which must be given whole or not at all.
    pub fn media(&self) -> Result<Option<MediaRef>, String> {
        match (&self.media_url, &self.media_type) {
            (Some(url), Some(mime_type)) => Ok(Some(MediaRef {
                url: url.clone(),
                mime_type: mime_type.clone(),
            })),
            (None, None) => Ok(None),
            _ => Err("mediaUrl and mediaType must be provided together".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[garde(context(()))]
pub struct PinMessageInput {
    #[garde(skip)]
    pub is_pinned: bool,
}

/// Query string of the history endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[garde(context(()))]
pub struct MessagesQuery {
    #[serde(default)]
    #[garde(range(min = 0))]
    pub cursor: Option<i64>,
    #[serde(default)]
    #[garde(range(min = 1, max = MAX_PAGE_SIZE))]
    pub limit: Option<u32>,
}

impl MessagesQuery {
    pub fn page_size(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

/// Helper trait to convert garde validation errors to String
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), String>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())
    }
}
