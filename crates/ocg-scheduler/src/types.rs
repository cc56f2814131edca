use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Maximum number of run-history records retained per job (oldest dropped).
pub const MAX_RUN_HISTORY: usize = 100;

/// Which schedule grammar a [`Schedule`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    At,
    Every,
    Cron,
}

/// `{kind, at|everyMs|expr, tz, staggerMs, anchorMs}` wire shape (see EXTERNAL INTERFACES).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub kind: ScheduleKind,
    /// RFC3339 instant, required when `kind == At`.
    pub at: Option<String>,
    /// Interval in milliseconds, required when `kind == Every`.
    pub every_ms: Option<i64>,
    /// 5- or 6-field cron expression, required when `kind == Cron`.
    pub expr: Option<String>,
    /// IANA timezone name for `Cron` evaluation; UTC if unset.
    pub tz: Option<String>,
    /// Deterministic per-job jitter added to the computed fire time.
    pub stagger_ms: Option<i64>,
    /// Alignment instant (ms since epoch) for `Every` schedules.
    pub anchor_ms: Option<i64>,
}

impl Schedule {
    pub fn once_at(at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            kind: ScheduleKind::At,
            at: Some(at.to_rfc3339()),
            every_ms: None,
            expr: None,
            tz: None,
            stagger_ms: None,
            anchor_ms: None,
        }
    }

    pub fn every(every_ms: i64, anchor_ms: Option<i64>) -> Self {
        Self {
            kind: ScheduleKind::Every,
            at: None,
            every_ms: Some(every_ms),
            expr: None,
            tz: None,
            stagger_ms: None,
            anchor_ms,
        }
    }

    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            kind: ScheduleKind::Cron,
            at: None,
            every_ms: None,
            expr: Some(expr.into()),
            tz: None,
            stagger_ms: None,
            anchor_ms: None,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.kind == ScheduleKind::At
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTarget {
    Main,
    Isolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WakeMode {
    Now,
    NextHeartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    SystemEvent,
    AgentTurn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub kind: PayloadKind,
    pub text: Option<String>,
    pub message: Option<String>,
    pub model: Option<String>,
    pub thinking: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Announce,
    Webhook,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub mode: DeliveryMode,
    pub channel: Option<String>,
    pub to: Option<String>,
    pub webhook: Option<String>,
    #[serde(default)]
    pub best_effort: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastStatus {
    Ok,
    Error,
    Skipped,
    Running,
}

impl std::fmt::Display for LastStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LastStatus::Ok => "ok",
            LastStatus::Error => "error",
            LastStatus::Skipped => "skipped",
            LastStatus::Running => "running",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LastStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ok" => Ok(LastStatus::Ok),
            "error" => Ok(LastStatus::Error),
            "skipped" => Ok(LastStatus::Skipped),
            "running" => Ok(LastStatus::Running),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub next_run_at_ms: Option<i64>,
    pub last_run_at_ms: Option<i64>,
    pub last_status: Option<LastStatus>,
    pub last_duration_ms: Option<i64>,
    pub consecutive_errors: u32,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            next_run_at_ms: None,
            last_run_at_ms: None,
            last_status: None,
            last_duration_ms: None,
            consecutive_errors: 0,
        }
    }
}

/// One bounded run-history record (`≤100` per job, oldest dropped).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub started_at_ms: i64,
    pub duration_ms: i64,
    pub status: LastStatus,
    pub error: Option<String>,
}

/// A persisted cron job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub session_target: SessionTarget,
    pub wake_mode: WakeMode,
    pub payload: Payload,
    pub delivery: Option<Delivery>,
    pub delete_after_run: bool,
    pub state: JobState,
    /// Bounded ring of past executions, most recent last.
    #[serde(default)]
    pub run_history: VecDeque<RunRecord>,
    pub created_at: String,
    pub updated_at: String,
}

impl Job {
    pub fn push_run_record(&mut self, record: RunRecord) {
        self.run_history.push_back(record);
        while self.run_history.len() > MAX_RUN_HISTORY {
            self.run_history.pop_front();
        }
    }
}
