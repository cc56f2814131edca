//! `user_tasks` / `user_subtasks` — ordered subtask progress tracking (§4.7).

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTask {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub completed: i64,
    pub total: i64,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubtask {
    pub id: String,
    pub task_id: String,
    pub position: i64,
    pub title: String,
    pub status: TaskStatus,
    pub detail: Option<String>,
}

#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, subtasks))]
    pub fn create_task(&self, title: &str, subtasks: &[String]) -> Result<UserTask> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let task_id = Uuid::new_v4().to_string();

        tx.execute(
            "INSERT INTO user_tasks (id, title, status, completed, total, created_at, updated_at)
             VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4)",
            rusqlite::params![task_id, title, subtasks.len() as i64, now],
        )?;

        for (i, sub_title) in subtasks.iter().enumerate() {
            tx.execute(
                "INSERT INTO user_subtasks (id, task_id, position, title, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
                rusqlite::params![Uuid::new_v4().to_string(), task_id, i as i64, sub_title, now],
            )?;
        }

        tx.commit()?;
        Ok(UserTask {
            id: task_id,
            title: title.to_string(),
            status: TaskStatus::Pending,
            completed: 0,
            total: subtasks.len() as i64,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        })
    }

    /// Returns the lowest-position subtask still `pending`, if any.
    pub fn get_pending_subtask(&self, task_id: &str) -> Result<Option<UserSubtask>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, task_id, position, title, status, detail FROM user_subtasks
             WHERE task_id = ?1 AND status = 'pending' ORDER BY position LIMIT 1",
            [task_id],
            |row| {
                Ok(UserSubtask {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    position: row.get(2)?,
                    title: row.get(3)?,
                    status: TaskStatus::parse(&row.get::<_, String>(4)?),
                    detail: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Moves a subtask to `status`; when it becomes `completed`, bumps the
    /// parent's `completed` counter and, once `completed >= total`, finalises
    /// the parent task. Re-entering `completed` is a no-op (status guard).
    #[instrument(skip(self))]
    pub fn update_subtask_status(
        &self,
        subtask_id: &str,
        status: TaskStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let (task_id, prev_status): (String, String) = tx
            .query_row(
                "SELECT task_id, status FROM user_subtasks WHERE id = ?1",
                [subtask_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| SchedulerError::TaskNotFound {
                id: subtask_id.to_string(),
            })?;
        let prev_status = TaskStatus::parse(&prev_status);

        tx.execute(
            "UPDATE user_subtasks SET status = ?1, detail = COALESCE(?2, detail), updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![status.as_str(), detail, now, subtask_id],
        )?;

        // Idempotency guard: only a pending->completed transition increments the parent.
        if status == TaskStatus::Completed && prev_status != TaskStatus::Completed {
            tx.execute(
                "UPDATE user_tasks SET completed = completed + 1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, task_id],
            )?;
            let (completed, total): (i64, i64) = tx.query_row(
                "SELECT completed, total FROM user_tasks WHERE id = ?1",
                [&task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            if completed >= total {
                tx.execute(
                    "UPDATE user_tasks SET status = 'completed', completed_at = ?1, updated_at = ?1
                     WHERE id = ?2",
                    rusqlite::params![now, task_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<UserTask>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, status, completed, total, created_at, updated_at, completed_at
             FROM user_tasks WHERE id = ?1",
            [id],
            |row| {
                Ok(UserTask {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    status: TaskStatus::parse(&row.get::<_, String>(2)?),
                    completed: row.get(3)?,
                    total: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                    completed_at: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_tasks(&self) -> Result<Vec<UserTask>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, status, completed, total, created_at, updated_at, completed_at
             FROM user_tasks ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserTask {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    status: TaskStatus::parse(&row.get::<_, String>(2)?),
                    completed: row.get(3)?,
                    total: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                    completed_at: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Resets every `failed` subtask of `task_id` back to `pending` and
    /// clears the parent's `failed` status so `get_pending_subtask` picks
    /// them up again. A task with no failed subtasks is left untouched.
    #[instrument(skip(self))]
    pub fn retry_task(&self, task_id: &str) -> Result<UserTask> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "UPDATE user_subtasks SET status = 'pending', updated_at = ?1
             WHERE task_id = ?2 AND status = 'failed'",
            rusqlite::params![now, task_id],
        )?;
        tx.execute(
            "UPDATE user_tasks SET status = 'running', updated_at = ?1
             WHERE id = ?2 AND status = 'failed'",
            rusqlite::params![now, task_id],
        )?;

        let task = tx
            .query_row(
                "SELECT id, title, status, completed, total, created_at, updated_at, completed_at
                 FROM user_tasks WHERE id = ?1",
                [task_id],
                |row| {
                    Ok(UserTask {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        status: TaskStatus::parse(&row.get::<_, String>(2)?),
                        completed: row.get(3)?,
                        total: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                        completed_at: row.get(7)?,
                    })
                },
            )
            .map_err(|_| SchedulerError::TaskNotFound { id: task_id.to_string() })?;

        tx.commit()?;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use std::sync::Arc;

    #[test]
    fn completion_threshold_finalises_parent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let store = TaskStore::new(Arc::new(Mutex::new(conn)));

        let task = store
            .create_task("ship feature", &["write code".into(), "write tests".into()])
            .unwrap();

        let first = store.get_pending_subtask(&task.id).unwrap().unwrap();
        store
            .update_subtask_status(&first.id, TaskStatus::Completed, None)
            .unwrap();
        let mid = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(mid.completed, 1);
        assert_eq!(mid.status, TaskStatus::Pending);

        let second = store.get_pending_subtask(&task.id).unwrap().unwrap();
        store
            .update_subtask_status(&second.id, TaskStatus::Completed, None)
            .unwrap();
        let done = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(done.completed, 2);
        assert_eq!(done.status, TaskStatus::Completed);

        // Re-entering completed must not double-increment.
        store
            .update_subtask_status(&second.id, TaskStatus::Completed, None)
            .unwrap();
        let still_done = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(still_done.completed, 2);
    }
}
