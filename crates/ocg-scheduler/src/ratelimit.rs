//! `rate_limits` table — atomic fixed-window counter (§4.7).

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::instrument;

use crate::error::Result;

const WINDOW_SECS: i64 = 3600;

#[derive(Clone)]
pub struct RateLimiter {
    conn: Arc<Mutex<Connection>>,
}

impl RateLimiter {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Admits the request if `requests < max_requests`, incrementing atomically.
    /// `max_requests == 0` means unlimited and always admits without counting.
    #[instrument(skip(self))]
    pub fn check(&self, endpoint: &str, key: &str, max_requests: i64) -> Result<bool> {
        if max_requests == 0 {
            return Ok(true);
        }
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO rate_limits (endpoint, key, requests, window_start, max_requests)
             VALUES (?1, ?2, 0, ?3, ?4)
             ON CONFLICT(endpoint, key) DO NOTHING",
            rusqlite::params![endpoint, key, now.to_rfc3339(), max_requests],
        )?;

        let window_start: String = conn.query_row(
            "SELECT window_start FROM rate_limits WHERE endpoint = ?1 AND key = ?2",
            rusqlite::params![endpoint, key],
            |row| row.get(0),
        )?;
        let started = chrono::DateTime::parse_from_rfc3339(&window_start)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(now);

        if (now - started).num_seconds() > WINDOW_SECS {
            conn.execute(
                "UPDATE rate_limits SET requests = 0, window_start = ?1
                 WHERE endpoint = ?2 AND key = ?3",
                rusqlite::params![now.to_rfc3339(), endpoint, key],
            )?;
        }

        let affected = conn.execute(
            "UPDATE rate_limits SET requests = requests + 1
             WHERE endpoint = ?1 AND key = ?2 AND requests < max_requests",
            rusqlite::params![endpoint, key],
        )?;

        Ok(affected == 1)
    }

    /// Create or update the `max_requests` ceiling for `(endpoint, key)`,
    /// resetting its window. Used by the `ratelimit set` CLI command.
    #[instrument(skip(self))]
    pub fn set_limit(&self, endpoint: &str, key: &str, max_requests: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO rate_limits (endpoint, key, requests, window_start, max_requests)
             VALUES (?1, ?2, 0, ?3, ?4)
             ON CONFLICT(endpoint, key) DO UPDATE SET max_requests = excluded.max_requests",
            rusqlite::params![endpoint, key, now, max_requests],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<RateLimitRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT endpoint, key, requests, window_start, max_requests FROM rate_limits
             ORDER BY endpoint, key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RateLimitRow {
                endpoint: row.get(0)?,
                key: row.get(1)?,
                requests: row.get(2)?,
                window_start: row.get(3)?,
                max_requests: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self))]
    pub fn delete(&self, endpoint: &str, key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM rate_limits WHERE endpoint = ?1 AND key = ?2",
            rusqlite::params![endpoint, key],
        )?;
        Ok(rows == 1)
    }
}

/// One row as listed by the `ratelimit list` CLI command.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitRow {
    pub endpoint: String,
    pub key: String,
    pub requests: i64,
    pub window_start: String,
    pub max_requests: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use std::sync::Arc;

    #[test]
    fn burst_admits_exactly_max() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let limiter = RateLimiter::new(Arc::new(Mutex::new(conn)));

        let admitted = (0..10)
            .filter(|_| limiter.check("endpoint", "key", 5).unwrap())
            .count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn zero_max_is_unlimited() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let limiter = RateLimiter::new(Arc::new(Mutex::new(conn)));
        for _ in 0..20 {
            assert!(limiter.check("endpoint", "key", 0).unwrap());
        }
    }
}
