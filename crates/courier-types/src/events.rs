use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::api::{ChatSummary, MessagePayload};
use crate::models::{ChatId, MessageType, UserId};

/// Events sent over the live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Every chat of the connected user, most recently active first
    ChatList { chats: Vec<ChatSummary> },

    /// Full history of one chat, oldest first
    MessagesList {
        chat_id: ChatId,
        messages: Vec<MessagePayload>,
    },

    /// A message was persisted in a chat this user belongs to
    NewMessage {
        chat_id: ChatId,
        message: MessagePayload,
    },

    /// A chat's summary changed (new last message)
    NewChatActivity { chat: ChatSummary },

    /// A chat was created through the HTTP surface
    NewChat { chat: ChatSummary },

    /// The last action on this connection failed
    Error { error: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// A send request as it arrives on the wire. Every field is optional at this
/// stage; [`SendMessage::validate`] decides whether it is usable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SendMessage {
    #[serde(default)]
    pub recipient_id: Option<UserId>,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageType>,
    #[serde(default)]
    pub text: Option<String>,
    /// Base64 payload, optionally as a `data:<mime>;base64,` URL.
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub waveform: Option<Vec<f64>>,
}

impl SendMessage {
    /// Checks the fields a send needs before anything is looked up or stored.
    /// Returns the recipient on success.
    pub fn validate(&self) -> Result<UserId, ActionError> {
        let recipient_id = self
            .recipient_id
            .ok_or(ActionError::MissingField("recipient_id"))?;
        if self.text().is_empty() && !self.has_media() {
            return Err(ActionError::EmptyMessage);
        }
        Ok(recipient_id)
    }

    pub fn kind(&self) -> MessageType {
        self.kind.unwrap_or_default()
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn has_media(&self) -> bool {
        self.media.as_deref().is_some_and(|m| !m.is_empty())
    }
}

/// Actions sent FROM client TO server over the live connection.
///
/// The wire form is a JSON object with an optional `action` field. An object
/// without `action` (or with `"action": "send_message"`) is a send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    FetchMessages { chat_id: ChatId },
    FetchChats,
    SendMessage(SendMessage),
}

#[derive(Debug, Error, PartialEq)]
pub enum ActionError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("message needs text or media")]
    EmptyMessage,
}

impl ClientAction {
    pub fn parse(text: &str) -> Result<Self, ActionError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ActionError::Malformed(e.to_string()))?;

        let Value::Object(ref obj) = value else {
            return Err(ActionError::Malformed("expected a JSON object".into()));
        };

        let action = match obj.get("action") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ActionError::Malformed("action must be a string".into())),
        };
        let chat_id = obj.get("chat_id").cloned();

        match action.as_deref() {
            Some("fetch_messages") => match chat_id {
                None | Some(Value::Null) => Err(ActionError::MissingField("chat_id")),
                Some(v) => v
                    .as_i64()
                    .map(|chat_id| Self::FetchMessages { chat_id })
                    .ok_or_else(|| ActionError::Malformed("chat_id must be an integer".into())),
            },
            Some("fetch_chats") => Ok(Self::FetchChats),
            None | Some("send_message") => serde_json::from_value::<SendMessage>(value)
                .map(Self::SendMessage)
                .map_err(|e| ActionError::Malformed(e.to_string())),
            Some(other) => Err(ActionError::UnknownAction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_object_is_a_send() {
        let action = ClientAction::parse(r#"{"recipient_id": 2, "text": "hi"}"#).unwrap();
        let ClientAction::SendMessage(send) = action else {
            panic!("expected send");
        };
        assert_eq!(send.validate(), Ok(2));
        assert_eq!(send.kind(), MessageType::Text);
        assert_eq!(send.text(), "hi");
    }

    #[test]
    fn fetch_actions() {
        assert_eq!(
            ClientAction::parse(r#"{"action": "fetch_messages", "chat_id": 5}"#),
            Ok(ClientAction::FetchMessages { chat_id: 5 })
        );
        assert_eq!(
            ClientAction::parse(r#"{"action": "fetch_chats"}"#),
            Ok(ClientAction::FetchChats)
        );
        assert_eq!(
            ClientAction::parse(r#"{"action": "fetch_messages"}"#),
            Err(ActionError::MissingField("chat_id"))
        );
    }

    #[test]
    fn non_integer_chat_id_is_malformed() {
        for raw in [
            r#"{"action": "fetch_messages", "chat_id": "5"}"#,
            r#"{"action": "fetch_messages", "chat_id": 5.5}"#,
            r#"{"action": "fetch_messages", "chat_id": [5]}"#,
        ] {
            assert_eq!(
                ClientAction::parse(raw),
                Err(ActionError::Malformed("chat_id must be an integer".into())),
                "{}",
                raw
            );
        }
    }

    #[test]
    fn rejects_garbage_and_unknown_actions() {
        assert!(matches!(
            ClientAction::parse("not json"),
            Err(ActionError::Malformed(_))
        ));
        assert!(matches!(
            ClientAction::parse("[1, 2]"),
            Err(ActionError::Malformed(_))
        ));
        assert_eq!(
            ClientAction::parse(r#"{"action": "delete_everything"}"#),
            Err(ActionError::UnknownAction("delete_everything".into()))
        );
        assert!(matches!(
            ClientAction::parse(r#"{"recipient_id": 2, "type": "sticker", "text": "x"}"#),
            Err(ActionError::Malformed(_))
        ));
    }

    #[test]
    fn send_validation() {
        let send = SendMessage {
            text: Some("hello".into()),
            ..Default::default()
        };
        assert_eq!(send.validate(), Err(ActionError::MissingField("recipient_id")));

        let send = SendMessage {
            recipient_id: Some(3),
            text: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(send.validate(), Err(ActionError::EmptyMessage));

        let send = SendMessage {
            recipient_id: Some(3),
            kind: Some(MessageType::Audio),
            media: Some("AAAA".into()),
            waveform: Some(vec![0.1, 0.5]),
            ..Default::default()
        };
        assert_eq!(send.validate(), Ok(3));
    }

    #[test]
    fn events_are_tagged_by_type() {
        let json = serde_json::to_value(ServerEvent::error("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "error": "nope"}));

        let json = serde_json::to_value(ServerEvent::ChatList { chats: vec![] }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "chat_list", "chats": []}));
    }
}
