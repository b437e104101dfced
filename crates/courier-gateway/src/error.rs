use courier_types::events::ActionError;
use courier_types::models::{ChatId, UserId};
use thiserror::Error;

/// Everything that can go wrong while serving a connection or request.
///
/// None of these are retried by the server; a client that wants a retry
/// resends its action.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("{0}")]
    Validation(#[from] ActionError),

    #[error("cannot open a chat with yourself")]
    SelfChat,

    #[error("recipient not found: {0}")]
    RecipientNotFound(UserId),

    #[error("chat not found")]
    ChatNotFound,

    #[error("user {0} is not a participant of chat {1}")]
    NotParticipant(UserId, ChatId),

    #[error("storage unavailable")]
    Persistence(#[from] anyhow::Error),

    #[error("media rejected: {0}")]
    MediaIngestion(String),
}

impl ChatError {
    /// True for errors caused by the request itself rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Persistence(_))
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Persistence(anyhow::anyhow!("blocking task failed: {}", e))
    }
}
