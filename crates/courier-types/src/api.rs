use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatId, MessageId, MessageType, UserId, UserProfile};

// -- JWT Claims --

/// Bearer token claims. Shared by the HTTP middleware and the gateway
/// upgrade so both paths authenticate identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub exp: usize,
}

impl Claims {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.sub,
            display_name: self.name.clone(),
            avatar_url: self.avatar.clone(),
        }
    }
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChatRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub user_id: Option<UserId>,
}

/// Short user rendering embedded in chats and messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<UserProfile> for UserSummary {
    fn from(p: UserProfile) -> Self {
        Self {
            id: p.id,
            display_name: p.display_name,
            avatar_url: p.avatar_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: UserId,
    pub is_read: bool,
}

/// A chat as seen by one of its two participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    pub counterpart: UserSummary,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: UserSummary,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub text: String,
    pub media_url: Option<String>,
    pub duration: Option<f64>,
    pub waveform: Option<Vec<f64>>,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
