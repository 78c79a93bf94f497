use huddle_proto::input::{CreateConversationInput, SendMessageInput};
use huddle_proto::{Conversation, ConversationSummary, Message, MessagePage, USER_ID_HEADER};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ClientError;

/// Error body rendered by the server
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for the Huddle read and write endpoints, acting as one user.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    user_id: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, user_id)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn create_conversation(
        &self,
        input: &CreateConversationInput,
    ) -> Result<Conversation, ClientError> {
        self.send(self.http.post(self.url("/conversations")).json(input))
            .await
    }

    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        name: Option<&str>,
    ) -> Result<Conversation, ClientError> {
        let url = self.url(&format!("/conversations/{}", conversation_id));
        self.send(self.http.patch(url).json(&json!({ "name": name })))
            .await
    }

    pub async fn join_general_chat(&self) -> Result<Conversation, ClientError> {
        self.send(self.http.post(self.url("/conversations/general/join")))
            .await
    }

    pub async fn set_conversation_pin(
        &self,
        conversation_id: &str,
        pinned: bool,
    ) -> Result<Conversation, ClientError> {
        let url = self.url(&format!("/conversations/{}/pin", conversation_id));
        let request = if pinned {
            self.http.post(url)
        } else {
            self.http.delete(url)
        };
        self.send(request).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        self.send(self.http.get(self.url("/conversations"))).await
    }

    /// One page of history after `cursor`, oldest first
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        cursor: Option<i64>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ClientError> {
        let mut params = Vec::new();
        if let Some(cursor) = cursor {
            params.push(format!("cursor={}", cursor));
        }
        if let Some(limit) = limit {
            params.push(format!("limit={}", limit));
        }
        let mut path = format!("/conversations/{}/messages", conversation_id);
        if !params.is_empty() {
            path.push('?');
            path.push_str(&params.join("&"));
        }
        self.send(self.http.get(self.url(&path))).await
    }

    /// Walk every page from the start of the conversation.
    pub async fn load_history(&self, conversation_id: &str) -> Result<MessagePage, ClientError> {
        let mut messages = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.list_messages(conversation_id, cursor, None).await?;
            messages.extend(page.messages);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(MessagePage {
            messages,
            next_cursor: None,
        })
    }

    pub async fn list_pinned_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ClientError> {
        let url = self.url(&format!("/conversations/{}/messages/pinned", conversation_id));
        self.send(self.http.get(url)).await
    }

    pub async fn send_message(&self, input: &SendMessageInput) -> Result<Message, ClientError> {
        self.send(self.http.post(self.url("/messages")).json(input))
            .await
    }

    pub async fn set_message_pin(&self, message_id: &str, pinned: bool) -> Result<Message, ClientError> {
        let url = self.url(&format!("/messages/{}/pin", message_id));
        self.send(self.http.post(url).json(&json!({ "isPinned": pinned })))
            .await
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<Message, ClientError> {
        let url = self.url(&format!("/messages/{}", message_id));
        self.send(self.http.delete(url)).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.header(USER_ID_HEADER, &self.user_id).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.to_string(),
        };
        debug!(status = status.as_u16(), %message, "Request rejected");
        Err(ClientError::from_status(status.as_u16(), message))
    }
}
