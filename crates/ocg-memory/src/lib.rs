//! `ocg-memory` — per-user fact memory (`MemoryManager`) and the hybrid
//! semantic `VectorMemory` store, sharing one SQLite file.

pub mod db;
pub mod error;
pub mod manager;
pub mod types;
pub mod vector;

pub use error::MemoryError;
pub use manager::MemoryManager;
pub use types::*;
pub use vector::{EmbedProvider, VectorMemory};
