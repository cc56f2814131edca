//! Process lifecycle across `agent -> gateway -> embedding`: PID+start-time
//! liveness, platform-aware stop escalation, protocol-specific readiness.

pub mod error;
pub mod pidfile;
pub mod process;
pub mod types;

pub use error::{Result, SupervisorError};
pub use process::Supervisor;
pub use types::{PidRecord, ReadinessProbe, ServiceKind, ServiceStatus};
