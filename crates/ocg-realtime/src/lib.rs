//! Bidirectional realtime audio sessions: turn assembly, tool callbacks,
//! transcription/VAD events, and modality-directive parsing.

pub mod error;
pub mod session;
pub mod types;
pub mod wav;

pub use error::{RealtimeError, Result};
pub use session::{RealtimeCallbacks, RealtimeSession, RealtimeTransport, VendorEvent};
pub use types::{
    parse_modality_directive, Modality, ModalityDirective, RealtimeConfig, Transcription,
    TranscriptionType, ToolCall, ToolResponse, TurnSignal, UsageTotals, VadEvent,
};
