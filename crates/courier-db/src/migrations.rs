use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, chats, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id            INTEGER PRIMARY KEY,
                display_name  TEXT NOT NULL,
                avatar_url    TEXT,
                updated_at    TEXT NOT NULL
            );

            -- One row per unordered pair, always stored smaller id first
            CREATE TABLE chats (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_a_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                user_b_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                UNIQUE(user_a_id, user_b_id),
                CHECK(user_a_id < user_b_id)
            );

            CREATE INDEX idx_chats_user_b ON chats(user_b_id);

            CREATE TABLE messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                sender_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                kind        TEXT NOT NULL DEFAULT 'text'
                            CHECK(kind IN ('text', 'image', 'video', 'audio', 'round_video')),
                text        TEXT NOT NULL DEFAULT '',
                media_ref   TEXT,
                duration    REAL,
                waveform    TEXT,
                timestamp   TEXT NOT NULL,
                is_read     INTEGER NOT NULL DEFAULT 0,
                CHECK(text <> '' OR media_ref IS NOT NULL)
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, timestamp, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
