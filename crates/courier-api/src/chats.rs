use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use courier_gateway::ChatError;
use courier_types::api::{CreateChatRequest, MessageQuery};
use courier_types::events::ActionError;
use courier_types::models::UserProfile;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<impl IntoResponse, ApiError> {
    let chats = state.messenger.chat_list(user.id).await?;
    Ok(Json(chats))
}

/// Get or create the chat with `user_id`. 201 when it was created.
pub async fn create_chat(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (chat, created) = state.messenger.open_chat(&user, req.user_id).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(chat)))
}

/// History of the chat between the caller and `?user_id=`, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let counterpart = query
        .user_id
        .ok_or(ChatError::Validation(ActionError::MissingField("user_id")))?;
    let (_, messages) = state.messenger.messages_with(user.id, counterpart).await?;
    Ok(Json(messages))
}
