//! Database row types. These map directly to SQLite rows.
//! Distinct from courier-types API models to keep the DB layer independent.

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRow {
    pub id: i64,
    pub user_a_id: i64,
    pub user_b_id: i64,
    pub created_at: String,
}

impl ChatRow {
    pub fn has_participant(&self, user_id: i64) -> bool {
        self.user_a_id == user_id || self.user_b_id == user_id
    }

    /// The participant that is not `viewer`. A non-participant viewer gets
    /// `user_a_id`; callers check membership first.
    pub fn counterpart_of(&self, viewer: i64) -> i64 {
        if self.user_a_id == viewer {
            self.user_b_id
        } else {
            self.user_a_id
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub kind: String,
    pub text: String,
    pub media_ref: Option<String>,
    pub duration: Option<f64>,
    pub waveform: Option<Vec<f64>>,
    pub timestamp: String,
    pub is_read: bool,
}

/// Fields of a message about to be inserted. Id and timestamp are assigned
/// by the store.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub chat_id: i64,
    pub sender_id: i64,
    pub kind: String,
    pub text: String,
    pub media_ref: Option<String>,
    pub duration: Option<f64>,
    pub waveform: Option<Vec<f64>>,
}
