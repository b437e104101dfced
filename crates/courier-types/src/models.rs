use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric user identity, as issued by the identity service.
pub type UserId = i64;
pub type ChatId = i64;
pub type MessageId = i64;

/// A user as known to this service. The identity service owns users;
/// this is the mirrored copy used for rendering and recipient lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    RoundVideo,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::Text,
        MessageType::Image,
        MessageType::Video,
        MessageType::Audio,
        MessageType::RoundVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::RoundVideo => "round_video",
        }
    }

    /// File extension used when a media payload carries no MIME type.
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Text => "bin",
            Self::Image => "jpg",
            Self::Video | Self::RoundVideo => "mp4",
            Self::Audio => "ogg",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown message type: {}", s))
    }
}

/// An unordered pair of distinct users, stored as (smaller, larger).
///
/// Every chat lookup and creation goes through this type so that
/// `(a, b)` and `(b, a)` always resolve to the same row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatPair {
    low: UserId,
    high: UserId,
}

impl ChatPair {
    /// Returns `None` when both ids are the same user.
    pub fn new(a: UserId, b: UserId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn user_a(&self) -> UserId {
        self.low
    }

    pub fn user_b(&self) -> UserId {
        self.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_order_independent() {
        assert_eq!(ChatPair::new(7, 3), ChatPair::new(3, 7));
        let pair = ChatPair::new(9, 2).unwrap();
        assert_eq!((pair.user_a(), pair.user_b()), (2, 9));
    }

    #[test]
    fn pair_rejects_self() {
        assert!(ChatPair::new(4, 4).is_none());
    }

    #[test]
    fn message_type_wire_names() {
        assert_eq!("round_video".parse::<MessageType>(), Ok(MessageType::RoundVideo));
        assert!("sticker".parse::<MessageType>().is_err());
        assert_eq!(
            serde_json::to_string(&MessageType::RoundVideo).unwrap(),
            "\"round_video\""
        );
    }
}
