//! HTTP surface over `ChatService`.
//!
//! The caller is identified by the `X-User-Id` header; session resolution is
//! left to whatever sits in front of this server.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use huddle_proto::input::{
    CreateConversationInput, MessagesQuery, PinMessageInput, RenameConversationInput,
    SendMessageInput, MAX_USER_ID_LENGTH,
};
use huddle_proto::{Conversation, ConversationSummary, Message, MessagePage, USER_ID_HEADER};
use serde_json::{json, Value};

use crate::error::{ChatError, ChatResult};
use crate::state::ServerState;

type AppState = State<Arc<ServerState>>;

/// Authenticated caller taken from the `X-User-Id` header
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.len() <= MAX_USER_ID_LENGTH)
            .ok_or(ChatError::Unauthorized)?;
        Ok(CallerId(user_id.to_string()))
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/conversations", post(create_conversation).get(list_conversations))
        .route("/conversations/general/join", post(join_general_chat))
        .route("/conversations/{id}", patch(rename_conversation))
        .route(
            "/conversations/{id}/pin",
            post(pin_conversation).delete(unpin_conversation),
        )
        .route("/conversations/{id}/messages", get(list_messages))
        .route("/conversations/{id}/messages/pinned", get(list_pinned_messages))
        .route("/messages", post(post_message))
        .route("/messages/{id}", delete(delete_message))
        .route("/messages/{id}/pin", post(set_message_pin))
        .with_state(state)
}

async fn health(State(state): AppState) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.hub().connection_count(),
    }))
}

async fn create_conversation(
    State(state): AppState,
    CallerId(user_id): CallerId,
    Json(body): Json<CreateConversationInput>,
) -> ChatResult<(StatusCode, Json<Conversation>)> {
    let conversation = state.service.create_conversation(&user_id, body).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn list_conversations(
    State(state): AppState,
    CallerId(user_id): CallerId,
) -> ChatResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(state.service.list_conversations(&user_id).await?))
}

async fn join_general_chat(
    State(state): AppState,
    CallerId(user_id): CallerId,
) -> ChatResult<Json<Conversation>> {
    Ok(Json(state.service.join_general_chat(&user_id).await?))
}

async fn rename_conversation(
    State(state): AppState,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
    Json(body): Json<RenameConversationInput>,
) -> ChatResult<Json<Conversation>> {
    Ok(Json(
        state.service.rename_conversation(&id, &user_id, body).await?,
    ))
}

async fn pin_conversation(
    State(state): AppState,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> ChatResult<Json<Conversation>> {
    Ok(Json(
        state.service.set_conversation_pin(&id, &user_id, true).await?,
    ))
}

async fn unpin_conversation(
    State(state): AppState,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> ChatResult<Json<Conversation>> {
    Ok(Json(
        state.service.set_conversation_pin(&id, &user_id, false).await?,
    ))
}

async fn list_messages(
    State(state): AppState,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ChatResult<Json<MessagePage>> {
    Ok(Json(state.service.list_messages(&id, &user_id, query).await?))
}

async fn list_pinned_messages(
    State(state): AppState,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> ChatResult<Json<Vec<Message>>> {
    Ok(Json(state.service.list_pinned_messages(&id, &user_id).await?))
}

async fn post_message(
    State(state): AppState,
    CallerId(user_id): CallerId,
    Json(body): Json<SendMessageInput>,
) -> ChatResult<(StatusCode, Json<Message>)> {
    let message = state.service.post_message(&user_id, body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn set_message_pin(
    State(state): AppState,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
    Json(body): Json<PinMessageInput>,
) -> ChatResult<Json<Message>> {
    Ok(Json(
        state
            .service
            .set_message_pin(&id, &user_id, body.is_pinned)
            .await?,
    ))
}

async fn delete_message(
    State(state): AppState,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> ChatResult<Json<Message>> {
    Ok(Json(state.service.delete_message(&id, &user_id).await?))
}
