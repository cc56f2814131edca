use std::sync::Mutex;

use async_trait::async_trait;
use ocg_memory::{ConversationMessage, MemoryManager};
use ocg_scheduler::TaskStore;
use rusqlite::Connection;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::types::{estimate_tokens, extract_task_done_markers, CompactionConfig, Session, SessionKey};

/// External collaborator that folds a run of older messages into one
/// `[summary]`-prefixed system message. Implemented by the LLM router.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[ConversationMessage]) -> std::result::Result<String, String>;
}

/// The context handed back to the caller ahead of an outbound LLM call.
pub struct PreparedContext {
    pub messages: Vec<ConversationMessage>,
    pub compacted: bool,
}

/// Thread-safe manager for persisted user sessions.
///
/// Wraps a single SQLite connection in a `Mutex`. For high-concurrency
/// deployments consider a connection pool (e.g. r2d2), but a Mutex is
/// sufficient for the single-node Phase 2 target.
pub struct SessionManager {
    db: Mutex<Connection>,
}

impl SessionManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Return an existing session or create a new one (upsert pattern).
    ///
    /// Creating a session is cheap — no LLM call is made. The session is
    /// persisted so stats survive restarts.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get_or_create(&self, key: &SessionKey) -> Result<Session> {
        // Fast path: session already exists
        if let Some(session) = self.get(key)? {
            debug!("session cache hit");
            return Ok(session);
        }

        // Slow path: create a new session row
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let key_str = key.format();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO sessions
             (id, session_key, user_id, agent_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![id, key_str, key.user_id, key.agent_id, key.name, now],
        )?;

        // Read back — handles the race where two threads insert simultaneously
        let session = db.query_row(
            "SELECT id, session_key, user_id, agent_id, name, title,
                    message_count, total_tokens, last_model,
                    last_compacted_message_id, compaction_count, last_summary,
                    created_at, updated_at
             FROM sessions WHERE session_key = ?1",
            rusqlite::params![key_str],
            row_to_session,
        )?;

        Ok(session)
    }

    /// Loads the messages since the compaction watermark, compacting them
    /// first if the estimated token usage crosses `config.compaction_threshold`.
    ///
    /// Runs synchronously on the hot path: the caller awaits this before
    /// making its outbound LLM call. If summarisation fails, the error is
    /// logged and the turn proceeds with the uncompacted tail.
    #[instrument(skip(self, memory, summarizer, tasks, config), fields(key = %key))]
    pub async fn prepare_context(
        &self,
        key: &SessionKey,
        memory: &MemoryManager,
        summarizer: &dyn Summarizer,
        tasks: &TaskStore,
        config: &CompactionConfig,
    ) -> Result<PreparedContext> {
        let session = self
            .get(key)?
            .ok_or_else(|| SessionError::NotFound { key: key.format() })?;

        const MAX_TAIL_MESSAGES: usize = 10_000;
        let key_str = key.format();
        // get_history already returns chronological (oldest-first) order, so
        // the prefix/kept split below walks the tail in the order it happened.
        let tail: Vec<ConversationMessage> = memory.get_history(&key_str, MAX_TAIL_MESSAGES)?;
        let mut tail: Vec<ConversationMessage> = tail
            .into_iter()
            .filter(|m| m.id > session.last_compacted_message_id)
            .collect();
        for msg in tail.iter_mut() {
            resolve_task_markers(msg, tasks)?;
        }

        let used_tokens: u32 = tail.iter().map(|m| estimate_tokens(&m.content)).sum();
        let budget = config.context_tokens.saturating_sub(config.reserve_tokens).max(1);
        let ratio = used_tokens as f64 / budget as f64;

        if ratio < config.compaction_threshold || tail.len() <= config.keep_messages {
            return Ok(PreparedContext {
                messages: tail,
                compacted: false,
            });
        }

        let split = tail.len() - config.keep_messages;
        let (prefix, kept) = tail.split_at(split);
        let last_prefix_id = prefix.last().map(|m| m.id).unwrap_or(session.last_compacted_message_id);

        match summarizer.summarize(prefix).await {
            Ok(summary_text) => {
                let summary_msg = ConversationMessage {
                    id: 0,
                    user_id: None,
                    session_key: key_str.clone(),
                    channel: "system".to_string(),
                    role: "system".to_string(),
                    content: format!("[summary] {summary_text}"),
                    model_used: None,
                    tokens_in: 0,
                    tokens_out: 0,
                    cost_usd: 0.0,
                    created_at: chrono::Utc::now().to_rfc3339(),
                };
                memory.save_message(&summary_msg)?;

                let mut db = self.db.lock().unwrap();
                let tx = db.transaction()?;
                let archived = archive_prefix(&tx, &key_str, prefix)?;
                tx.execute(
                    "UPDATE sessions SET last_compacted_message_id = ?1,
                     compaction_count = compaction_count + 1, last_summary = ?2,
                     updated_at = ?3 WHERE session_key = ?4",
                    rusqlite::params![
                        last_prefix_id,
                        summary_text,
                        chrono::Utc::now().to_rfc3339(),
                        key_str,
                    ],
                )?;
                tx.commit()?;
                info!(last_prefix_id, archived, kept = kept.len(), "session compacted");

                let mut messages = Vec::with_capacity(kept.len() + 1);
                messages.push(summary_msg);
                messages.extend(kept.iter().cloned());
                Ok(PreparedContext {
                    messages,
                    compacted: true,
                })
            }
            Err(e) => {
                warn!(error = %e, "compaction summarisation failed, proceeding uncompacted");
                Ok(PreparedContext {
                    messages: tail,
                    compacted: false,
                })
            }
        }
    }

    /// Retrieve a session by key, returning `None` if it does not exist.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get(&self, key: &SessionKey) -> Result<Option<Session>> {
        let key_str = key.format();
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, session_key, user_id, agent_id, name, title,
                    message_count, total_tokens, last_model,
                    last_compacted_message_id, compaction_count, last_summary,
                    created_at, updated_at
             FROM sessions WHERE session_key = ?1",
            rusqlite::params![key_str],
            row_to_session,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SessionError::Database(e)),
        }
    }

    /// List the most-recently-updated sessions for a user, newest first.
    #[instrument(skip(self), fields(user_id, limit))]
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Session>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_key, user_id, agent_id, name, title,
                    message_count, total_tokens, last_model,
                    last_compacted_message_id, compaction_count, last_summary,
                    created_at, updated_at
             FROM sessions
             WHERE user_id = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit as i64], row_to_session)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Increment `message_count` by 1, add `tokens` to `total_tokens`,
    /// and record the model that was used.
    ///
    /// Also bumps `updated_at` so `list_for_user` ordering stays current.
    #[instrument(skip(self), fields(key = %key, tokens, model))]
    pub fn update_stats(&self, key: &SessionKey, tokens: u64, model: &str) -> Result<()> {
        let key_str = key.format();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE sessions
             SET message_count = message_count + 1,
                 total_tokens  = total_tokens  + ?1,
                 last_model    = ?2,
                 updated_at    = ?3
             WHERE session_key = ?4",
            rusqlite::params![tokens as i64, model, now, key_str],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound { key: key_str });
        }
        Ok(())
    }

    /// Permanently delete a session record.
    ///
    /// The associated conversation history in the `conversations` table is
    /// owned by `ocg-memory` and must be cleaned up separately if needed.
    #[instrument(skip(self), fields(key = %key))]
    pub fn delete(&self, key: &SessionKey) -> Result<()> {
        let key_str = key.format();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "DELETE FROM sessions WHERE session_key = ?1",
            rusqlite::params![key_str],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound { key: key_str });
        }
        Ok(())
    }
}

/// Resolves `[task_done:task-XYZ]` markers in `msg` against the scheduler's
/// task store, appending a canonical detail line for each marker found.
/// A marker with no matching task (deleted, or from another session) is
/// left in place untouched rather than erroring the whole turn.
fn resolve_task_markers(msg: &mut ConversationMessage, tasks: &TaskStore) -> Result<()> {
    for marker in extract_task_done_markers(&msg.content) {
        if let Some(task) = tasks.get_task(&marker)? {
            msg.content.push_str(&format!(
                "\n[task {} \"{}\": {}/{} subtasks complete]",
                task.id, task.title, task.completed, task.total
            ));
        }
    }
    Ok(())
}

/// Copy the folded-away prefix into `messages_archive` before the watermark
/// moves past it, so every message below the watermark is either archived or
/// a `[summary]` entry. `[summary]` rows are skipped — they are already a
/// condensation of earlier history and archiving them would double it up.
///
/// Idempotent: `(session_key, source_message_id)` is unique, so re-archiving
/// an already-archived message is a no-op.
fn archive_prefix(tx: &rusqlite::Transaction, session_key: &str, prefix: &[ConversationMessage]) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO messages_archive
         (id, session_key, source_message_id, role, content, created_at, archived_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let archived_at = chrono::Utc::now().to_rfc3339();
    let mut count = 0;
    for msg in prefix {
        if msg.role == "system" && msg.content.starts_with("[summary]") {
            continue;
        }
        count += stmt.execute(rusqlite::params![
            Uuid::now_v7().to_string(),
            session_key,
            msg.id,
            msg.role,
            msg.content,
            msg.created_at,
            archived_at,
        ])?;
    }
    Ok(count)
}

/// Map a SQLite row to a `Session`.
fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let key_str: String = row.get(1)?;
    // If the stored key is somehow malformed we fall back to a reconstructed key
    // from the individual columns rather than panicking.
    let key = SessionKey::parse(&key_str).unwrap_or_else(|_| SessionKey {
        user_id: row.get::<_, String>(2).unwrap_or_default(),
        agent_id: row.get::<_, String>(3).unwrap_or_default(),
        name: row.get::<_, String>(4).unwrap_or_default(),
    });

    Ok(Session {
        id: row.get(0)?,
        key,
        title: row.get(5)?,
        message_count: row.get::<_, i64>(6)? as u32,
        total_tokens: row.get::<_, i64>(7)? as u64,
        last_model: row.get(8)?,
        last_compacted_message_id: row.get(9)?,
        compaction_count: row.get::<_, i64>(10)? as u32,
        last_summary: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    struct StubSummarizer;

    #[async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(&self, _messages: &[ConversationMessage]) -> std::result::Result<String, String> {
            Ok("folded prefix".to_string())
        }
    }

    fn task_store() -> TaskStore {
        let conn = Connection::open_in_memory().unwrap();
        ocg_scheduler::db::init_db(&conn).unwrap();
        TaskStore::new(Arc::new(StdMutex::new(conn)))
    }

    #[tokio::test]
    async fn compaction_archives_the_folded_prefix() {
        let sessions_conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&sessions_conn).unwrap();
        let manager = SessionManager::new(sessions_conn);

        let memory_conn = Connection::open_in_memory().unwrap();
        ocg_memory::db::init_db(&memory_conn).unwrap();
        let memory = MemoryManager::new(memory_conn);

        let key = SessionKey::new("u-1", "main", "main");
        manager.get_or_create(&key).unwrap();
        let key_str = key.format();

        // 100 messages, keep_messages = 10 -> 90 should be archived.
        for i in 0..100 {
            memory
                .save_message(&ConversationMessage {
                    id: 0,
                    user_id: Some("u-1".to_string()),
                    session_key: key_str.clone(),
                    channel: "test".to_string(),
                    role: "user".to_string(),
                    content: format!("message {i}"),
                    model_used: None,
                    tokens_in: 0,
                    tokens_out: 0,
                    cost_usd: 0.0,
                    created_at: chrono::Utc::now().to_rfc3339(),
                })
                .unwrap();
        }

        let config = CompactionConfig {
            context_tokens: 100,
            reserve_tokens: 0,
            soft_tokens: 100,
            compaction_threshold: 0.0,
            keep_messages: 10,
        };

        let summarizer = StubSummarizer;
        let tasks = task_store();
        let prepared = manager
            .prepare_context(&key, &memory, &summarizer, &tasks, &config)
            .await
            .unwrap();

        assert!(prepared.compacted);
        assert_eq!(prepared.messages.len(), 11); // summary + 10 kept

        let archived: i64 = manager
            .db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM messages_archive", [], |r| r.get(0))
            .unwrap();
        assert_eq!(archived, 90);

        let session = manager.get(&key).unwrap().unwrap();
        assert_eq!(session.compaction_count, 1);
        assert_eq!(session.last_compacted_message_id, 90);
    }

    #[tokio::test]
    async fn summary_rows_are_never_archived() {
        let mut tx_conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&tx_conn).unwrap();
        let tx = tx_conn.transaction().unwrap();

        let prefix = vec![
            ConversationMessage {
                id: 1,
                user_id: None,
                session_key: "k".to_string(),
                channel: "system".to_string(),
                role: "system".to_string(),
                content: "[summary] earlier history".to_string(),
                model_used: None,
                tokens_in: 0,
                tokens_out: 0,
                cost_usd: 0.0,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
            ConversationMessage {
                id: 2,
                user_id: Some("u-1".to_string()),
                session_key: "k".to_string(),
                channel: "test".to_string(),
                role: "user".to_string(),
                content: "hello".to_string(),
                model_used: None,
                tokens_in: 0,
                tokens_out: 0,
                cost_usd: 0.0,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        ];

        let archived = archive_prefix(&tx, "k", &prefix).unwrap();
        tx.commit().unwrap();
        assert_eq!(archived, 1);
    }

    #[test]
    fn resolves_task_markers_with_canonical_detail() {
        let tasks = task_store();
        let task = tasks.create_task("ship feature", &["write code".into()]).unwrap();

        let mut msg = ConversationMessage {
            id: 1,
            user_id: None,
            session_key: "k".to_string(),
            channel: "test".to_string(),
            role: "assistant".to_string(),
            content: format!("done! [task_done:{}]", task.id),
            model_used: None,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        resolve_task_markers(&mut msg, &tasks).unwrap();
        assert!(msg.content.contains("ship feature"));
        assert!(msg.content.contains("0/1 subtasks complete"));
    }

    #[test]
    fn unresolved_task_marker_is_left_untouched() {
        let tasks = task_store();
        let mut msg = ConversationMessage {
            id: 1,
            user_id: None,
            session_key: "k".to_string(),
            channel: "test".to_string(),
            role: "assistant".to_string(),
            content: "done! [task_done:task-ghost]".to_string(),
            model_used: None,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        resolve_task_markers(&mut msg, &tasks).unwrap();
        assert_eq!(msg.content, "done! [task_done:task-ghost]");
    }
}
