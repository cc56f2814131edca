//! Discord context interface — re-exported from the shared pipeline.
//!
//! `DiscordAppContext` is now an alias for `ocg_agent::pipeline::MessageContext`.
//! All channel adapters share the same trait, defined once in `ocg-agent` to
//! avoid circular dependencies.

pub use ocg_agent::pipeline::MessageContext as DiscordAppContext;
