//! `ocg-scheduler` — the pulse event queue and the cron engine.
//!
//! Two independent primitives share one SQLite file:
//!
//! - [`events`]: a priority FIFO with an atomic, exactly-once `claim_next`.
//! - [`engine`] + [`schedule`]: a persisted `CronJob` store driving a 1s tick
//!   loop through a bounded worker pool, plus `at`/`every`/`cron` schedule
//!   computation with stagger/anchor support.
//!
//! [`ratelimit`] and [`tasks`] round out the ambient bookkeeping tables that
//! share this store (rate limits, user task/subtask progress).

pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod ratelimit;
pub mod schedule;
pub mod tasks;
pub mod types;

pub use engine::{CronCallbacks, CronEngine, JobStore};
pub use error::{Result, SchedulerError};
pub use events::{priority, Event, EventQueue, EventStatus};
pub use ratelimit::{RateLimitRow, RateLimiter};
pub use tasks::{TaskStatus, TaskStore, UserSubtask, UserTask};
pub use types::{
    Delivery, DeliveryMode, Job, JobState, LastStatus, Payload, PayloadKind, RunRecord, Schedule,
    ScheduleKind, SessionTarget, WakeMode,
};
