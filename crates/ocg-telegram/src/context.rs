//! Telegram context interface — re-exported from the shared pipeline.
//!
//! `TelegramAppContext` is an alias for `ocg_agent::pipeline::MessageContext`.
//! All channel adapters share the same trait, defined once in `ocg-agent`.

pub use ocg_agent::pipeline::MessageContext as TelegramAppContext;
