use crate::Database;
use crate::models::{ChatRow, MessageRow, NewMessage, UserRow};
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use courier_types::models::ChatPair;
use rusqlite::{Connection, Row};
use tracing::warn;

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, kind, text, media_ref, duration, waveform, timestamp, is_read";

/// Fixed-width RFC 3339 so that string order is time order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    // -- Users --

    /// Mirror a user profile from the identity service.
    pub fn upsert_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, avatar_url, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     display_name = excluded.display_name,
                     avatar_url = excluded.avatar_url,
                     updated_at = excluded.updated_at",
                rusqlite::params![user.id, user.display_name, user.avatar_url, now_timestamp()],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Batch-fetch users for a set of ids. Unknown ids are skipped.
    pub fn get_users(&self, ids: &[i64]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, display_name, avatar_url FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Chats --

    /// Atomic get-or-create on the canonical pair. Returns the chat and
    /// whether this call created it.
    pub fn get_or_create_chat(&self, pair: ChatPair) -> Result<(ChatRow, bool)> {
        self.with_tx(|tx| {
            let inserted = tx.execute(
                "INSERT INTO chats (user_a_id, user_b_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_a_id, user_b_id) DO NOTHING",
                rusqlite::params![pair.user_a(), pair.user_b(), now_timestamp()],
            )?;

            let chat = query_chat_by_pair(tx, pair)?
                .ok_or_else(|| anyhow::anyhow!("chat vanished after upsert"))?;

            Ok((chat, inserted == 1))
        })
    }

    pub fn find_chat(&self, pair: ChatPair) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| query_chat_by_pair(conn, pair))
    }

    pub fn get_chat(&self, id: i64) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_a_id, user_b_id, created_at FROM chats WHERE id = ?1",
                [id],
                chat_from_row,
            )
            .optional()
        })
    }

    /// Every chat `user_id` takes part in, paired with its latest message.
    ///
    /// Ordered most recently active first; chats without messages come last,
    /// newest first.
    pub fn chats_with_last_message(
        &self,
        user_id: i64,
    ) -> Result<Vec<(ChatRow, Option<MessageRow>)>> {
        self.with_conn(|conn| {
            // Latest message per chat is picked with a correlated subquery so the
            // whole list is a single statement (no N+1).
            let mut stmt = conn.prepare(
                "SELECT c.id, c.user_a_id, c.user_b_id, c.created_at,
                        m.id, m.chat_id, m.sender_id, m.kind, m.text, m.media_ref,
                        m.duration, m.waveform, m.timestamp, m.is_read
                 FROM chats c
                 LEFT JOIN messages m ON m.id = (
                     SELECT id FROM messages
                     WHERE chat_id = c.id
                     ORDER BY timestamp DESC, id DESC
                     LIMIT 1
                 )
                 WHERE c.user_a_id = ?1 OR c.user_b_id = ?1
                 ORDER BY m.timestamp IS NULL, m.timestamp DESC, c.created_at DESC, c.id DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    let chat = chat_from_row(row)?;
                    let message_id: Option<i64> = row.get(4)?;
                    let last = match message_id {
                        Some(_) => Some(message_from_row_at(row, 4)?),
                        None => None,
                    };
                    Ok((chat, last))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message with a server-assigned timestamp.
    ///
    /// The timestamp is never earlier than the newest message already in the
    /// chat, so per-chat order survives a wall clock stepping backwards.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<MessageRow> {
        let waveform = msg
            .waveform
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_tx(|tx| {
            let latest: Option<String> = tx.query_row(
                "SELECT MAX(timestamp) FROM messages WHERE chat_id = ?1",
                [msg.chat_id],
                |row| row.get(0),
            )?;
            let now = now_timestamp();
            let timestamp = match latest {
                Some(latest) if latest > now => latest,
                _ => now,
            };

            tx.execute(
                "INSERT INTO messages (chat_id, sender_id, kind, text, media_ref, duration, waveform, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    msg.chat_id,
                    msg.sender_id,
                    msg.kind,
                    msg.text,
                    msg.media_ref,
                    msg.duration,
                    waveform,
                    timestamp,
                ],
            )?;

            let id = tx.last_insert_rowid();
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            let row = tx.query_row(&sql, [id], message_from_row)?;
            Ok(row)
        })
    }

    /// Remove one message. Returns whether it existed.
    pub fn delete_message(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages WHERE id = ?1", [id])? > 0))
    }

    /// All messages of a chat, oldest first.
    pub fn messages_for_chat(&self, chat_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE chat_id = ?1 ORDER BY timestamp ASC, id ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([chat_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn last_message(&self, chat_id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE chat_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                MESSAGE_COLUMNS
            );
            conn.query_row(&sql, [chat_id], message_from_row).optional()
        })
    }
}

fn query_user(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, display_name, avatar_url FROM users WHERE id = ?1",
        [id],
        user_from_row,
    )
    .optional()
}

fn query_chat_by_pair(conn: &Connection, pair: ChatPair) -> Result<Option<ChatRow>> {
    conn.query_row(
        "SELECT id, user_a_id, user_b_id, created_at FROM chats WHERE user_a_id = ?1 AND user_b_id = ?2",
        [pair.user_a(), pair.user_b()],
        chat_from_row,
    )
    .optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        display_name: row.get(1)?,
        avatar_url: row.get(2)?,
    })
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        user_a_id: row.get(1)?,
        user_b_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    message_from_row_at(row, 0)
}

/// Read the message columns starting at column `at`, in `MESSAGE_COLUMNS` order.
fn message_from_row_at(row: &Row<'_>, at: usize) -> rusqlite::Result<MessageRow> {
    let id: i64 = row.get(at)?;
    let waveform: Option<String> = row.get(at + 7)?;
    let waveform = waveform.and_then(|w| match serde_json::from_str(&w) {
        Ok(samples) => Some(samples),
        Err(e) => {
            warn!("Corrupt waveform on message {}: {}", id, e);
            None
        }
    });
    Ok(MessageRow {
        id,
        chat_id: row.get(at + 1)?,
        sender_id: row.get(at + 2)?,
        kind: row.get(at + 3)?,
        text: row.get(at + 4)?,
        media_ref: row.get(at + 5)?,
        duration: row.get(at + 6)?,
        waveform,
        timestamp: row.get(at + 8)?,
        is_read: row.get(at + 9)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
