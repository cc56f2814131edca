use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::{Schedule, ScheduleKind};

/// Compute the next fire time (ms since epoch) for `schedule`, strictly after `from_ms`.
///
/// Returns `None` when the schedule is exhausted (a past `at`, or an
/// unparseable `cron` expression — logged, never a panic).
pub fn compute_next_run_ms(job_id: &str, schedule: &Schedule, from_ms: i64) -> Option<i64> {
    let base = match schedule.kind {
        ScheduleKind::At => compute_at(schedule, from_ms),
        ScheduleKind::Every => compute_every(schedule, from_ms),
        ScheduleKind::Cron => compute_cron(job_id, schedule, from_ms),
    }?;

    // `at` schedules are not staggered — they already name an exact instant.
    if schedule.kind == ScheduleKind::At {
        return Some(base);
    }
    Some(base + stagger_offset_ms(job_id, schedule.stagger_ms.unwrap_or(0)))
}

fn compute_at(schedule: &Schedule, from_ms: i64) -> Option<i64> {
    let at = schedule.at.as_deref()?;
    let parsed = DateTime::parse_from_rfc3339(at).ok()?.with_timezone(&Utc);
    let at_ms = parsed.timestamp_millis();
    if at_ms > from_ms {
        Some(at_ms)
    } else {
        // Job's single shot is in the past: schedule is exhausted.
        None
    }
}

fn compute_every(schedule: &Schedule, from_ms: i64) -> Option<i64> {
    let every_ms = schedule.every_ms?;
    if every_ms <= 0 {
        return None;
    }
    match schedule.anchor_ms {
        Some(anchor) => {
            let elapsed = from_ms - anchor;
            let periods = if elapsed <= 0 { 1 } else { elapsed / every_ms + 1 };
            Some(anchor + periods * every_ms)
        }
        None => Some(from_ms + every_ms),
    }
}

fn compute_cron(job_id: &str, schedule: &Schedule, from_ms: i64) -> Option<i64> {
    let expr = schedule.expr.as_deref()?;
    let normalized = normalize_cron_expr(expr);
    let sched = match cron::Schedule::from_str(&normalized) {
        Ok(s) => s,
        Err(e) => {
            warn!(job_id, expr, "invalid cron expression: {e}");
            return None;
        }
    };
    let from = DateTime::<Utc>::from_timestamp_millis(from_ms)?;
    sched.after(&from).next().map(|dt| dt.timestamp_millis())
}

/// The `cron` crate requires a leading seconds field; the wire format allows
/// a bare 5-field (min hour day month weekday) expression, defaulting
/// seconds to `0`.
fn normalize_cron_expr(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Deterministic per-job jitter: `hash(job.id) mod staggerMs`.
fn stagger_offset_ms(job_id: &str, stagger_ms: i64) -> i64 {
    if stagger_ms <= 0 {
        return 0;
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    job_id.hash(&mut hasher);
    (hasher.finish() % stagger_ms as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schedule;

    #[test]
    fn every_aligns_to_anchor() {
        let schedule = Schedule::every(1000, Some(1_000_000_000));
        let next = compute_next_run_ms("job-no-stagger", &schedule, 1_000_000_500).unwrap();
        assert_eq!(next, 1_000_001_000);
    }

    #[test]
    fn every_on_a_period_boundary_advances_exactly_one_period() {
        let schedule = Schedule::every(1000, Some(1_000_000_000));
        let next = compute_next_run_ms("job-no-stagger", &schedule, 1_000_001_000).unwrap();
        assert_eq!(next, 1_000_002_000);
    }

    #[test]
    fn at_in_the_past_is_exhausted() {
        let schedule = Schedule::once_at(DateTime::from_timestamp_millis(1_000).unwrap());
        assert!(compute_next_run_ms("job", &schedule, 2_000).is_none());
    }

    #[test]
    fn cron_advances_strictly_after_from() {
        let schedule = Schedule::cron("*/1 * * * *");
        let from = Utc::now().timestamp_millis();
        let next = compute_next_run_ms("job", &schedule, from).unwrap();
        assert!(next > from);
    }
}
