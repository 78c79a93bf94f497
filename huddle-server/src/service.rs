//! Mutation and query API shared by the HTTP routes and the socket session.
//!
//! Every write commits through the store and then publishes the resulting
//! event through the hub. Both steps run in one blocking task, so an accepted
//! write is broadcast even if the caller goes away mid-request.

use std::sync::Arc;

use huddle_proto::input::{
    CreateConversationInput, MessagesQuery, RenameConversationInput, SendMessageInput, ValidateExt,
};
use huddle_proto::{Conversation, ConversationSummary, Message, MessagePage, ServerEvent};
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::hub::Hub;
use crate::store::Store;

#[derive(Clone)]
pub struct ChatService {
    store: Store,
    hub: Arc<Hub>,
}

impl ChatService {
    pub fn new(store: Store, hub: Arc<Hub>) -> Self {
        Self { store, hub }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    async fn run<T, F>(&self, f: F) -> ChatResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store, &Hub) -> ChatResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        let hub = self.hub.clone();
        tokio::task::spawn_blocking(move || f(&store, &hub)).await?
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        input: CreateConversationInput,
    ) -> ChatResult<Conversation> {
        input.validate_input().map_err(ChatError::Validation)?;
        let user_id = user_id.to_string();
        self.run(move |store, _| {
            store.create_conversation(&user_id, &input.participant_ids, input.name.as_deref())
        })
        .await
    }

    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
        input: RenameConversationInput,
    ) -> ChatResult<Conversation> {
        input.validate_input().map_err(ChatError::Validation)?;
        let (conversation_id, user_id) = (conversation_id.to_string(), user_id.to_string());
        self.run(move |store, _| {
            store.rename_conversation(&conversation_id, &user_id, input.name.as_deref())
        })
        .await
    }

    pub async fn join_general_chat(&self, user_id: &str) -> ChatResult<Conversation> {
        let user_id = user_id.to_string();
        self.run(move |store, _| store.join_general_chat(&user_id)).await
    }

    pub async fn set_conversation_pin(
        &self,
        conversation_id: &str,
        user_id: &str,
        pinned: bool,
    ) -> ChatResult<Conversation> {
        let (conversation_id, user_id) = (conversation_id.to_string(), user_id.to_string());
        self.run(move |store, _| store.set_conversation_pin(&conversation_id, &user_id, pinned))
            .await
    }

    pub async fn list_conversations(&self, user_id: &str) -> ChatResult<Vec<ConversationSummary>> {
        let user_id = user_id.to_string();
        self.run(move |store, _| store.list_conversations(&user_id)).await
    }

    pub async fn list_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
        query: MessagesQuery,
    ) -> ChatResult<MessagePage> {
        query.validate_input().map_err(ChatError::Validation)?;
        let (conversation_id, user_id) = (conversation_id.to_string(), user_id.to_string());
        self.run(move |store, _| {
            store.list_messages(&conversation_id, &user_id, query.cursor, query.page_size())
        })
        .await
    }

    pub async fn list_pinned_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<Vec<Message>> {
        let (conversation_id, user_id) = (conversation_id.to_string(), user_id.to_string());
        self.run(move |store, _| store.list_pinned_messages(&conversation_id, &user_id))
            .await
    }

    /// Store a message and broadcast `new_message` to the conversation.
    pub async fn post_message(&self, sender_id: &str, input: SendMessageInput) -> ChatResult<Message> {
        input.validate_input().map_err(ChatError::Validation)?;
        let sender_id = sender_id.to_string();
        self.run(move |store, hub| {
            let message = store.post_message(&sender_id, &input)?;
            let report = hub.publish(
                &message.conversation_id,
                &ServerEvent::NewMessage {
                    message: message.clone(),
                },
            );
            debug!(message_id = %message.id, ?report, "Published new message");
            Ok(message)
        })
        .await
    }

    pub async fn set_message_pin(
        &self,
        message_id: &str,
        user_id: &str,
        pinned: bool,
    ) -> ChatResult<Message> {
        let (message_id, user_id) = (message_id.to_string(), user_id.to_string());
        self.run(move |store, hub| {
            let message = store.set_message_pin(&message_id, &user_id, pinned)?;
            hub.publish(
                &message.conversation_id,
                &ServerEvent::MessagePinned {
                    message: message.clone(),
                },
            );
            Ok(message)
        })
        .await
    }

    /// Soft-delete and broadcast `message_deleted`.
    pub async fn delete_message(&self, message_id: &str, user_id: &str) -> ChatResult<Message> {
        let (message_id, user_id) = (message_id.to_string(), user_id.to_string());
        self.run(move |store, hub| {
            let message = store.soft_delete_message(&message_id, &user_id)?;
            hub.publish(
                &message.conversation_id,
                &ServerEvent::MessageDeleted {
                    message: message.clone(),
                },
            );
            Ok(message)
        })
        .await
    }
}
