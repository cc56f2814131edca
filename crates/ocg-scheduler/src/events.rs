//! `events` table — a priority FIFO with an exactly-once atomic claim.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    ProcessingLlm,
    Completed,
    Dismissed,
}

impl EventStatus {
    fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::ProcessingLlm => "processing_llm",
            EventStatus::Completed => "completed",
            EventStatus::Dismissed => "dismissed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "processing" => EventStatus::Processing,
            "processing_llm" => EventStatus::ProcessingLlm,
            "completed" => EventStatus::Completed,
            "dismissed" => EventStatus::Dismissed,
            _ => EventStatus::Pending,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Dismissed)
    }
}

/// Priority bands named in §4.4.
pub mod priority {
    pub const BROADCAST_CRITICAL: i64 = 0;
    pub const HIGH: i64 = 1;
    pub const NORMAL: i64 = 2;
    pub const LOW: i64 = 3;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub response: Option<String>,
    pub priority: i64,
    pub status: EventStatus,
    pub channel: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub event_type: Option<String>,
    pub hook_name: Option<String>,
    pub metadata: Option<String>,
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        response: row.get(3)?,
        priority: row.get(4)?,
        status: EventStatus::parse(&row.get::<_, String>(5)?),
        channel: row.get(6)?,
        created_at: row.get(7)?,
        processed_at: row.get(8)?,
        event_type: row.get(9)?,
        hook_name: row.get(10)?,
        metadata: row.get(11)?,
    })
}

const EVENT_COLUMNS: &str = "id, title, content, response, priority, status, channel, \
     created_at, processed_at, event_type, hook_name, metadata";

/// Shared handle over the `events` table. Cloned cheaply; one `Mutex<Connection>`
/// behind it serialises writers the same way every other SQLite-backed
/// component in this workspace does.
#[derive(Clone)]
pub struct EventQueue {
    conn: Arc<Mutex<Connection>>,
}

impl EventQueue {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    #[instrument(skip(self))]
    pub fn enqueue(
        &self,
        title: &str,
        content: &str,
        priority: i64,
        channel: Option<&str>,
        event_type: Option<&str>,
        hook_name: Option<&str>,
        metadata: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO events (title, content, priority, status, channel, created_at,
                                  event_type, hook_name, metadata)
             VALUES (?1,?2,?3,'pending',?4,?5,?6,?7,?8)",
            rusqlite::params![title, content, priority, channel, now, event_type, hook_name, metadata],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Exactly-once claim: single `UPDATE … WHERE id = (SELECT … ORDER BY
    /// priority, created_at LIMIT 1) RETURNING *` so the row claimed is the
    /// row returned, even with other events already `processing` under
    /// concurrent workers (see §4.4 / TESTABLE PROPERTIES). A follow-up
    /// SELECT against `status = 'processing'` would return the global
    /// processing-head instead of this call's own claim, breaking
    /// exactly-once; `RETURNING` binds the result to the exact row the
    /// UPDATE touched instead.
    #[instrument(skip(self))]
    pub fn claim_next(&self) -> Result<Option<Event>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "UPDATE events SET status = 'processing'
                 WHERE id = (
                     SELECT id FROM events
                     WHERE status = 'pending'
                     ORDER BY priority ASC, created_at ASC
                     LIMIT 1
                 )
                 RETURNING {EVENT_COLUMNS}"
            ),
            [],
            row_to_event,
        )
        .optional()
        .map_err(Into::into)
    }

    #[instrument(skip(self))]
    pub fn set_status(
        &self,
        id: i64,
        status: EventStatus,
        response: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        if status.is_terminal() {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE events SET status=?1, response=COALESCE(?2, response), processed_at=?3 WHERE id=?4",
                rusqlite::params![status.as_str(), response, now, id],
            )?;
        } else {
            conn.execute(
                "UPDATE events SET status=?1, response=COALESCE(?2, response) WHERE id=?3",
                rusqlite::params![status.as_str(), response, id],
            )?;
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<Event>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
            [id],
            row_to_event,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_by(
        &self,
        event_type: Option<&str>,
        hook_name: Option<&str>,
    ) -> Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE (?1 IS NULL OR event_type = ?1)
               AND (?2 IS NULL OR hook_name = ?2)
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![event_type, hook_name], row_to_event)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// `ClearOldEvents(hours)` — deletes terminal rows older than `now − hours`.
    #[instrument(skip(self))]
    pub fn clear_old(&self, hours: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        let n = conn.execute(
            "DELETE FROM events
             WHERE status IN ('completed','dismissed') AND processed_at < ?1",
            [&cutoff],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use std::sync::Arc;

    fn queue() -> EventQueue {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        EventQueue::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn claim_is_exactly_once() {
        let q = queue();
        q.enqueue("t", "c", priority::NORMAL, None, None, None, None)
            .unwrap();
        let first = q.claim_next().unwrap();
        assert!(first.is_some());
        let second = q.claim_next().unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn claim_next_skips_events_already_in_flight() {
        // Regression test: two events enqueued, first claimed and left
        // `processing` (simulating a worker still on it), second claim must
        // return the OTHER event rather than re-returning the processing head.
        let q = queue();
        let first_id = q.enqueue("a", "c", priority::NORMAL, None, None, None, None)
            .unwrap();
        let second_id = q.enqueue("b", "c", priority::NORMAL, None, None, None, None)
            .unwrap();

        let first = q.claim_next().unwrap().unwrap();
        assert_eq!(first.id, first_id);

        let second = q.claim_next().unwrap().unwrap();
        assert_eq!(second.id, second_id);
        assert_ne!(second.id, first.id);

        assert!(q.claim_next().unwrap().is_none());
    }

    #[test]
    fn concurrent_claims_never_double_assign() {
        use std::collections::HashSet;
        use std::sync::{Arc as StdArc, Mutex as StdMutex};
        use std::thread;

        let q = queue();
        for i in 0..20 {
            q.enqueue(&format!("job-{i}"), "c", priority::NORMAL, None, None, None, None)
                .unwrap();
        }

        let claimed_ids = StdArc::new(StdMutex::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let q = q.clone();
                let claimed_ids = StdArc::clone(&claimed_ids);
                thread::spawn(move || {
                    while let Some(event) = q.claim_next().unwrap() {
                        claimed_ids.lock().unwrap().push(event.id);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let ids = claimed_ids.lock().unwrap();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), 20);
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn priority_then_fifo_ordering() {
        let q = queue();
        q.enqueue("low", "c", priority::LOW, None, None, None, None)
            .unwrap();
        q.enqueue("high", "c", priority::HIGH, None, None, None, None)
            .unwrap();
        let claimed = q.claim_next().unwrap().unwrap();
        assert_eq!(claimed.title, "high");
    }
}
