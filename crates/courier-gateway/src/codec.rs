//! Row -> wire conversion for chats and messages.
//!
//! Every chat rendering takes the viewing user explicitly: the counterpart
//! shown is whichever participant is not the viewer.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

use courier_db::Database;
use courier_db::models::{ChatRow, MessageRow, UserRow};
use courier_types::api::{ChatSummary, LastMessage, MessagePayload, UserSummary};
use courier_types::models::{MessageType, UserId};

use crate::media::MediaStore;

pub fn serialize_chat(db: &Database, chat: &ChatRow, viewing_user: UserId) -> Result<ChatSummary> {
    let last = db.last_message(chat.id)?;
    let counterpart_id = chat.counterpart_of(viewing_user);
    let users = user_map(db, &[counterpart_id])?;
    Ok(chat_summary(chat, last.as_ref(), user_summary(&users, counterpart_id)))
}

/// All chats of `user`, most recently active first.
pub fn serialize_chat_list(db: &Database, user: UserId) -> Result<Vec<ChatSummary>> {
    let chats = db.chats_with_last_message(user)?;
    let counterpart_ids: Vec<UserId> = chats.iter().map(|(c, _)| c.counterpart_of(user)).collect();
    let users = user_map(db, &counterpart_ids)?;

    Ok(chats
        .iter()
        .map(|(chat, last)| {
            let counterpart = user_summary(&users, chat.counterpart_of(user));
            chat_summary(chat, last.as_ref(), counterpart)
        })
        .collect())
}

pub fn serialize_message(db: &Database, media: &MediaStore, message: &MessageRow) -> Result<MessagePayload> {
    let users = user_map(db, &[message.sender_id])?;
    Ok(message_payload(media, message, user_summary(&users, message.sender_id)))
}

pub fn serialize_messages(
    db: &Database,
    media: &MediaStore,
    messages: &[MessageRow],
) -> Result<Vec<MessagePayload>> {
    let mut sender_ids: Vec<UserId> = messages.iter().map(|m| m.sender_id).collect();
    sender_ids.sort_unstable();
    sender_ids.dedup();
    let users = user_map(db, &sender_ids)?;

    Ok(messages
        .iter()
        .map(|m| message_payload(media, m, user_summary(&users, m.sender_id)))
        .collect())
}

fn chat_summary(chat: &ChatRow, last: Option<&MessageRow>, counterpart: UserSummary) -> ChatSummary {
    ChatSummary {
        id: chat.id,
        counterpart,
        last_message: last.map(|m| LastMessage {
            text: m.text.clone(),
            timestamp: parse_timestamp(&m.timestamp),
            sender_id: m.sender_id,
            is_read: m.is_read,
        }),
        created_at: parse_timestamp(&chat.created_at),
    }
}

fn message_payload(media: &MediaStore, m: &MessageRow, sender: UserSummary) -> MessagePayload {
    MessagePayload {
        id: m.id,
        chat_id: m.chat_id,
        sender,
        kind: m.kind.parse().unwrap_or_else(|e| {
            warn!("Corrupt kind on message {}: {}", m.id, e);
            MessageType::Text
        }),
        text: m.text.clone(),
        media_url: m.media_ref.as_deref().map(|r| media.url_for(r)),
        duration: m.duration,
        waveform: m.waveform.clone(),
        timestamp: parse_timestamp(&m.timestamp),
        is_read: m.is_read,
    }
}

fn user_map(db: &Database, ids: &[UserId]) -> Result<HashMap<UserId, UserRow>> {
    Ok(db.get_users(ids)?.into_iter().map(|u| (u.id, u)).collect())
}

fn user_summary(users: &HashMap<UserId, UserRow>, id: UserId) -> UserSummary {
    match users.get(&id) {
        Some(u) => UserSummary {
            id,
            display_name: u.display_name.clone(),
            avatar_url: u.avatar_url.clone(),
        },
        None => {
            warn!("No profile for user {}", id);
            UserSummary {
                id,
                display_name: "unknown".to_string(),
                avatar_url: None,
            }
        }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') form: "YYYY-MM-DD HH:MM:SS", no timezone
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
