use rusqlite::Connection;

use crate::error::Result;

/// Initialise the sessions table, the compaction archive, and their indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id            TEXT PRIMARY KEY,
            session_key   TEXT NOT NULL UNIQUE,
            user_id       TEXT NOT NULL,
            agent_id      TEXT NOT NULL,
            name          TEXT NOT NULL,
            title         TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            total_tokens  INTEGER NOT NULL DEFAULT 0,
            last_model    TEXT,
            last_compacted_message_id INTEGER NOT NULL DEFAULT 0,
            compaction_count          INTEGER NOT NULL DEFAULT 0,
            last_summary              TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions(user_id, updated_at DESC);

        CREATE TABLE IF NOT EXISTS messages_archive (
            id                TEXT PRIMARY KEY,
            session_key       TEXT NOT NULL,
            source_message_id INTEGER NOT NULL,
            role              TEXT NOT NULL,
            content           TEXT NOT NULL,
            created_at        TEXT NOT NULL,
            archived_at       TEXT NOT NULL,
            UNIQUE (session_key, source_message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_archive_session
            ON messages_archive(session_key, source_message_id);",
    )?;
    Ok(())
}
