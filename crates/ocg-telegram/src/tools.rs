//! Tool re-export for the Telegram adapter.
//!
//! All tools are shared — implemented once in `ocg-agent` and re-exported here
//! following the same thin-wrapper pattern as `ocg-discord/src/tools.rs`.

pub use ocg_agent::tools::build::build_tools;
