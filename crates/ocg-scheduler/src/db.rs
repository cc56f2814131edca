use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`: cron jobs, the pulse event
/// queue, rate limits and user tasks all live in this one SQLite file
/// alongside the rest of the store.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id               TEXT    NOT NULL PRIMARY KEY,
            name             TEXT    NOT NULL,
            enabled          INTEGER NOT NULL DEFAULT 1,
            schedule         TEXT    NOT NULL,   -- JSON Schedule
            session_target   TEXT    NOT NULL DEFAULT 'main',
            wake_mode        TEXT    NOT NULL DEFAULT 'now',
            payload          TEXT    NOT NULL,   -- JSON Payload
            delivery         TEXT,               -- JSON Delivery or NULL
            delete_after_run INTEGER NOT NULL DEFAULT 0,
            next_run_at_ms   INTEGER,
            last_run_at_ms   INTEGER,
            last_status      TEXT,
            last_duration_ms INTEGER,
            consecutive_errors INTEGER NOT NULL DEFAULT 0,
            run_history      TEXT    NOT NULL DEFAULT '[]',
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs (next_run_at_ms);

        CREATE TABLE IF NOT EXISTS events (
            id          INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            title       TEXT    NOT NULL,
            content     TEXT    NOT NULL DEFAULT '',
            response    TEXT,
            priority    INTEGER NOT NULL DEFAULT 2,
            status      TEXT    NOT NULL DEFAULT 'pending',
            channel     TEXT,
            created_at  TEXT    NOT NULL,
            processed_at TEXT,
            event_type  TEXT,
            hook_name   TEXT,
            metadata    TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_events_claim
            ON events (status, priority, created_at);
        CREATE INDEX IF NOT EXISTS idx_events_type ON events (event_type);
        CREATE INDEX IF NOT EXISTS idx_events_hook ON events (hook_name);

        CREATE TABLE IF NOT EXISTS rate_limits (
            endpoint     TEXT    NOT NULL,
            key          TEXT    NOT NULL,
            requests     INTEGER NOT NULL DEFAULT 0,
            window_start TEXT    NOT NULL,
            max_requests INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (endpoint, key)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS user_tasks (
            id          TEXT    NOT NULL PRIMARY KEY,
            title       TEXT    NOT NULL,
            status      TEXT    NOT NULL DEFAULT 'pending',
            completed   INTEGER NOT NULL DEFAULT 0,
            total       INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL,
            completed_at TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS user_subtasks (
            id          TEXT    NOT NULL PRIMARY KEY,
            task_id     TEXT    NOT NULL REFERENCES user_tasks(id),
            position    INTEGER NOT NULL,
            title       TEXT    NOT NULL,
            status      TEXT    NOT NULL DEFAULT 'pending',
            detail      TEXT,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_subtasks_task ON user_subtasks (task_id, position);
        ",
    )?;
    Ok(())
}
