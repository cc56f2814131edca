use std::fmt;

/// The three services a single deployment supervises, in start order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Agent,
    Gateway,
    Embedding,
}

impl ServiceKind {
    pub const START_ORDER: [ServiceKind; 3] =
        [ServiceKind::Agent, ServiceKind::Gateway, ServiceKind::Embedding];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Agent => "agent",
            ServiceKind::Gateway => "gateway",
            ServiceKind::Embedding => "embedding",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The on-disk contents of a PID file: `"<pid> <start_epoch>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidRecord {
    pub pid: i32,
    pub start_epoch: i64,
}

impl PidRecord {
    pub fn format(&self) -> String {
        format!("{} {}", self.pid, self.start_epoch)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split_whitespace();
        let pid = parts.next()?.parse().ok()?;
        let start_epoch = parts.next()?.parse().ok()?;
        Some(Self { pid, start_epoch })
    }

    /// A PID file younger than 60s with a matching PID is trusted without
    /// needing to re-derive the running process's actual start time — PID
    /// reuse within that window is treated as vanishingly unlikely.
    pub fn is_fresh(&self, now_epoch: i64) -> bool {
        now_epoch - self.start_epoch < 60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Running { pid: i32 },
    /// A PID file exists but signal-0 failed: the process died without
    /// cleaning up after itself.
    Stale { pid: i32 },
}

/// How to verify a service finished starting.
#[derive(Debug, Clone)]
pub enum ReadinessProbe {
    /// Connect to a local socket path.
    SocketConnect(String),
    /// Expect HTTP 200 from this URL.
    HttpHealth(String),
}
