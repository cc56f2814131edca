//! Shared context interface for all channel adapters.
//!
//! `MessageContext` is the single trait that every channel host (gateway, discord,
//! future telegram, etc.) must implement. It replaces the old `DiscordAppContext`
//! and lets the pipeline crate stay channel-agnostic.

use ocg_memory::manager::MemoryManager;
use ocg_scheduler::JobStore;
use ocg_terminal::manager::TerminalManager;

use crate::runtime::AgentRuntime;

/// Minimal context interface required by the shared message pipeline.
///
/// Implemented by `AppState` in `ocg-gateway` and any future channel host.
/// Defined here (in `ocg-agent`) to avoid circular dependency: all channel
/// crates depend on `ocg-agent`; `ocg-agent` depends only on `ocg-core`,
/// `ocg-memory`, `ocg-scheduler`, and `ocg-terminal`.
pub trait MessageContext: Send + Sync {
    fn agent(&self) -> &AgentRuntime;
    fn memory(&self) -> &MemoryManager;
    fn terminal(&self) -> &tokio::sync::Mutex<TerminalManager>;
    fn scheduler(&self) -> &JobStore;
}
