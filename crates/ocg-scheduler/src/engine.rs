use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::compute_next_run_ms,
    types::{Delivery, Job, JobState, Payload, PayloadKind, RunRecord, Schedule, SessionTarget, WakeMode, LastStatus},
};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let schedule: Schedule = serde_json::from_str::<Schedule>(&row.get::<_, String>(3)?)
        .unwrap_or_else(|_| Schedule::every(60_000, None));
    let payload: Payload = serde_json::from_str(&row.get::<_, String>(6)?).unwrap_or(Payload {
        kind: PayloadKind::SystemEvent,
        text: None,
        message: None,
        model: None,
        thinking: None,
        timeout_seconds: None,
    });
    let delivery: Option<Delivery> = row
        .get::<_, Option<String>>(7)?
        .and_then(|s| serde_json::from_str(&s).ok());
    let run_history: VecDeque<RunRecord> = row
        .get::<_, String>(14)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        enabled: row.get::<_, i64>(2)? != 0,
        schedule,
        session_target: match row.get::<_, String>(4)?.as_str() {
            "isolated" => SessionTarget::Isolated,
            _ => SessionTarget::Main,
        },
        wake_mode: match row.get::<_, String>(5)?.as_str() {
            "next-heartbeat" => WakeMode::NextHeartbeat,
            _ => WakeMode::Now,
        },
        payload,
        delivery,
        delete_after_run: row.get::<_, i64>(8)? != 0,
        state: JobState {
            next_run_at_ms: row.get(9)?,
            last_run_at_ms: row.get(10)?,
            last_status: row
                .get::<_, Option<String>>(11)?
                .and_then(|s| s.parse().ok()),
            last_duration_ms: row.get(12)?,
            consecutive_errors: row.get::<_, i64>(13)? as u32,
        },
        run_history,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

const JOB_COLUMNS: &str = "id, name, enabled, schedule, session_target, wake_mode, payload, \
     delivery, delete_after_run, next_run_at_ms, last_run_at_ms, last_status, \
     last_duration_ms, consecutive_errors, run_history, created_at, updated_at";

/// Callbacks set once at construction time, breaking the cyclic-ownership
/// relationship between the engine and the systems it calls back into
/// (§9 DESIGN NOTES).
pub struct CronCallbacks {
    pub system_event: Box<dyn Fn(String, String) + Send + Sync>,
    pub agent_turn:
        Box<dyn Fn(String, Payload) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send>> + Send + Sync>,
    pub broadcast: Box<dyn Fn(String, String) + Send + Sync>,
    pub webhook: Box<dyn Fn(String, String) + Send + Sync>,
    pub wake: Box<dyn Fn(String) + Send + Sync>,
}

/// Shared handle for job management (list/add/remove) independent of the tick loop.
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let c = conn.lock().unwrap();
            init_db(&c)?;
        }
        Ok(Self { conn })
    }

    pub fn add_job(
        &self,
        name: &str,
        schedule: Schedule,
        payload: Payload,
        session_target: SessionTarget,
        wake_mode: WakeMode,
        delivery: Option<Delivery>,
        delete_after_run: bool,
    ) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = now_ms();
        let now_str = Utc::now().to_rfc3339();
        let next = compute_next_run_ms(&id, &schedule, now);

        conn.execute(
            "INSERT INTO jobs
             (id, name, enabled, schedule, session_target, wake_mode, payload, delivery,
              delete_after_run, next_run_at_ms, last_run_at_ms, last_status, last_duration_ms,
              consecutive_errors, run_history, created_at, updated_at)
             VALUES (?1,?2,1,?3,?4,?5,?6,?7,?8,?9,NULL,NULL,NULL,0,'[]',?10,?10)",
            rusqlite::params![
                id,
                name,
                serde_json::to_string(&schedule)?,
                match session_target {
                    SessionTarget::Main => "main",
                    SessionTarget::Isolated => "isolated",
                },
                match wake_mode {
                    WakeMode::Now => "now",
                    WakeMode::NextHeartbeat => "next-heartbeat",
                },
                serde_json::to_string(&payload)?,
                delivery.as_ref().map(serde_json::to_string).transpose()?,
                delete_after_run as i64,
                next,
                now_str,
            ],
        )?;

        info!(job_id = %id, %name, "cron job added");
        Ok(Job {
            id,
            name: name.to_string(),
            enabled: true,
            schedule,
            session_target,
            wake_mode,
            payload,
            delivery,
            delete_after_run,
            state: JobState {
                next_run_at_ms: next,
                ..Default::default()
            },
            run_history: VecDeque::new(),
            created_at: now_str.clone(),
            updated_at: now_str,
        })
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at"))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [id],
            row_to_job,
        )
        .ok()
        .map(Ok)
        .transpose()
    }

    fn due_jobs(&self, now: i64) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE enabled = 1 AND next_run_at_ms IS NOT NULL AND next_run_at_ms <= ?1
               AND (last_status IS NULL OR last_status != 'running')"
        ))?;
        let jobs = stmt
            .query_map([now], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    fn mark_running(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET last_status = 'running' WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    fn record_result(
        &self,
        job: &Job,
        now: i64,
        status: LastStatus,
        duration_ms: i64,
        error: Option<String>,
    ) -> Result<()> {
        let new_count = if status == LastStatus::Ok {
            0
        } else {
            job.state.consecutive_errors + 1
        };

        let disable_after_run = job.schedule.is_one_shot() && job.delete_after_run;
        let next = if disable_after_run {
            None
        } else {
            compute_next_run_ms(&job.id, &job.schedule, now)
        };
        let enabled = !disable_after_run;

        let mut history = job.run_history.clone();
        history.push_back(RunRecord {
            started_at_ms: now,
            duration_ms,
            status,
            error,
        });
        while history.len() > crate::types::MAX_RUN_HISTORY {
            history.pop_front();
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET enabled=?1, next_run_at_ms=?2, last_run_at_ms=?3, last_status=?4,
              last_duration_ms=?5, consecutive_errors=?6, run_history=?7, updated_at=?8
             WHERE id=?9",
            rusqlite::params![
                enabled as i64,
                next,
                now,
                status.to_string(),
                duration_ms,
                new_count,
                serde_json::to_string(&history)?,
                Utc::now().to_rfc3339(),
                job.id,
            ],
        )?;
        Ok(())
    }
}

/// Drives the tick loop and fans execution out through a bounded pool.
pub struct CronEngine {
    store: JobStore,
    callbacks: Arc<CronCallbacks>,
    pool_size: usize,
}

impl CronEngine {
    pub fn new(store: JobStore, callbacks: CronCallbacks, pool_size: usize) -> Self {
        Self {
            store,
            callbacks: Arc::new(callbacks),
            pool_size: pool_size.max(1),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Main tick loop. Polls every second until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("cron engine started");
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        // In-process guard against double-dispatch of the same job within one
        // tick, in addition to the DB-level `running` status.
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&semaphore, &in_flight).await {
                        error!("cron tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(
        &self,
        semaphore: &Arc<Semaphore>,
        in_flight: &Arc<Mutex<HashSet<String>>>,
    ) -> Result<()> {
        let now = now_ms();
        let due = self.store.due_jobs(now)?;

        for job in due {
            {
                let mut guard = in_flight.lock().unwrap();
                if !guard.insert(job.id.clone()) {
                    continue;
                }
            }
            self.store.mark_running(&job.id)?;

            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let callbacks = self.callbacks.clone();
            let in_flight = in_flight.clone();

            tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                if matches!(job.wake_mode, WakeMode::NextHeartbeat) {
                    (callbacks.wake)(job.id.clone());
                }

                let started = now_ms();
                let result = execute_job(&job, &callbacks).await;
                let duration = now_ms() - started;

                let (status, error) = match &result {
                    Ok(_) => (LastStatus::Ok, None),
                    Err(e) => (LastStatus::Error, Some(e.to_string())),
                };

                if let Err(e) = store.record_result(&job, now_ms(), status, duration, error) {
                    error!(job_id = %job.id, "failed to record cron run: {e}");
                }

                in_flight.lock().unwrap().remove(&job.id);
            });
        }
        Ok(())
    }

    /// Execute a single job synchronously, outside the pool. Used by the
    /// `RunJob(id)` CLI/RPC path; still serialised against the tick loop by
    /// the same DB-level `running` guard so it can never double-run.
    pub async fn run_job_now(&self, id: &str) -> Result<()> {
        let job = self
            .store
            .get_job(id)?
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        if job.state.last_status == Some(LastStatus::Running) {
            warn!(job_id = %id, "RunJob ignored: already running");
            return Ok(());
        }
        self.store.mark_running(id)?;
        let started = now_ms();
        let result = execute_job(&job, &self.callbacks).await;
        let duration = now_ms() - started;
        let (status, error) = match &result {
            Ok(_) => (LastStatus::Ok, None),
            Err(e) => (LastStatus::Error, Some(e.to_string())),
        };
        self.store
            .record_result(&job, now_ms(), status, duration, error)?;
        result.map(|_| ())
    }
}

async fn execute_job(job: &Job, callbacks: &CronCallbacks) -> Result<String> {
    let outcome = match job.payload.kind {
        PayloadKind::SystemEvent => {
            let text = job.payload.text.clone().unwrap_or_default();
            (callbacks.system_event)(job.id.clone(), text);
            Ok(String::new())
        }
        PayloadKind::AgentTurn => (callbacks.agent_turn)(job.id.clone(), job.payload.clone()).await,
    };

    match (&outcome, &job.delivery) {
        (Ok(result), Some(delivery)) => {
            use crate::types::DeliveryMode;
            let deliver_result = match delivery.mode {
                DeliveryMode::Announce => {
                    (callbacks.broadcast)(
                        delivery.channel.clone().unwrap_or_default(),
                        result.clone(),
                    );
                    Ok(())
                }
                DeliveryMode::Webhook => {
                    (callbacks.webhook)(delivery.webhook.clone().unwrap_or_default(), result.clone());
                    Ok(())
                }
                DeliveryMode::None => Ok(()),
            };
            if deliver_result.is_err() && !delivery.best_effort {
                return deliver_result.map(|_| result.clone());
            }
        }
        _ => {}
    }

    outcome
}
