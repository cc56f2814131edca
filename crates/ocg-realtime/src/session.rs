use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{RealtimeError, Result};
use crate::types::{
    RealtimeConfig, Transcription, ToolCall, ToolResponse, TurnSignal, UsageTotals, VadEvent,
};
use crate::wav::wrap_pcm16_mono;

const SAMPLE_RATE_HZ: u32 = 24_000;

/// Events a vendor transport's receive loop hands to the session. Modelled
/// as an enum rather than a trait object per event so `dispatch_vendor_event`
/// stays a single exhaustive match.
#[derive(Debug, Clone)]
pub enum VendorEvent {
    AudioChunk(Vec<u8>),
    Text(String),
    ToolCall(ToolCall),
    Transcription(Transcription),
    Vad(VadEvent),
    Turn(TurnSignal),
    Usage { prompt: u64, response: u64 },
    GoAway(String),
    Error(String),
    Disconnected,
}

/// One-shot outbound surface to the vendor. The concrete websocket/gRPC
/// client lives outside this crate (out of scope); tests and callers supply
/// a fake or real implementation.
#[async_trait::async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn send_audio(&self, pcm: &[u8]) -> Result<()>;
    async fn send_text(&self, text: &str) -> Result<()>;
    async fn send_tool_response(&self, response: &ToolResponse) -> Result<()>;
}

type BoxFut<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Callbacks set at construction, matching the cyclic-ownership guidance:
/// function values rather than an inheritance hierarchy.
pub struct RealtimeCallbacks {
    pub on_audio: Box<dyn Fn(Vec<u8>) + Send + Sync>,
    pub on_text: Box<dyn Fn(String) + Send + Sync>,
    pub on_tool_call: Box<dyn Fn(ToolCall) -> BoxFut<Option<ToolResponse>> + Send + Sync>,
    pub on_transcription: Box<dyn Fn(Transcription) + Send + Sync>,
    pub on_vad: Box<dyn Fn(VadEvent) + Send + Sync>,
    pub on_go_away: Box<dyn Fn(String) + Send + Sync>,
    pub on_session_update: Box<dyn Fn(bool) + Send + Sync>,
    pub on_usage: Box<dyn Fn(u64, u64) + Send + Sync>,
    pub on_error: Box<dyn Fn(String) + Send + Sync>,
    pub on_disconnect: Box<dyn Fn() + Send + Sync>,
}

/// A session-scoped bidirectional audio provider.
///
/// The PCM accumulator is a `Vec<u8>` behind a `tokio::sync::Mutex`,
/// mirroring the single-mutex-per-resource idiom used for PTY sessions
/// elsewhere in this workspace. Token usage accumulates across the life of
/// the session rather than resetting per turn.
pub struct RealtimeSession {
    transport: Arc<dyn RealtimeTransport>,
    callbacks: Arc<RealtimeCallbacks>,
    accumulator: Mutex<Vec<u8>>,
    connected: AtomicBool,
    usage: Mutex<UsageTotals>,
    config: RealtimeConfig,
}

impl RealtimeSession {
    /// One-shot connect. `dispatch_vendor_event` is driven by a caller-owned
    /// receive loop (one `tokio::spawn`ed task per session) reading from the
    /// vendor transport; this constructor only establishes local state.
    #[instrument(skip(transport, callbacks, config))]
    pub fn connect(
        transport: Arc<dyn RealtimeTransport>,
        callbacks: RealtimeCallbacks,
        config: RealtimeConfig,
    ) -> Self {
        info!(modality = ?config.modality, "realtime session connected");
        Self {
            transport,
            callbacks: Arc::new(callbacks),
            accumulator: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            usage: Mutex::new(UsageTotals::default()),
            config,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn require_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RealtimeError::NotConnected)
        }
    }

    /// Append a PCM chunk. Callers must serialise `send_*` calls per session
    /// with an external mutex; this provider is not internally safe against
    /// interleaved sends.
    pub async fn send_audio(&self, pcm16le_mono_chunk: &[u8]) -> Result<()> {
        self.require_connected()?;
        self.transport.send_audio(pcm16le_mono_chunk).await
    }

    pub async fn end_audio(&self) -> Result<()> {
        self.require_connected()?;
        Ok(())
    }

    /// Sends text and resets the accumulator so a new turn starts clean.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.require_connected()?;
        self.accumulator.lock().await.clear();
        self.transport.send_text(text).await
    }

    pub async fn send_tool_response(&self, response: ToolResponse) -> Result<()> {
        self.require_connected()?;
        self.transport.send_tool_response(&response).await
    }

    /// Dispatched, in order, from the per-session receive loop. Callback
    /// ordering across event kinds is not guaranteed; within one kind it is
    /// strict because this is the loop's only caller.
    pub async fn dispatch_vendor_event(&self, event: VendorEvent) {
        match event {
            VendorEvent::AudioChunk(chunk) => {
                self.accumulator.lock().await.extend_from_slice(&chunk);
            }
            VendorEvent::Turn(_signal) => {
                let pcm = std::mem::take(&mut *self.accumulator.lock().await);
                if !pcm.is_empty() {
                    let wav = wrap_pcm16_mono(&pcm, SAMPLE_RATE_HZ);
                    (self.callbacks.on_audio)(wav);
                }
            }
            VendorEvent::Text(text) => (self.callbacks.on_text)(text),
            VendorEvent::ToolCall(call) => {
                let callbacks = self.callbacks.clone();
                let transport = self.transport.clone();
                let response = (callbacks.on_tool_call)(call).await;
                if let Some(response) = response {
                    if let Err(e) = transport.send_tool_response(&response).await {
                        warn!(error = %e, "failed to deliver tool response");
                    }
                }
            }
            VendorEvent::Transcription(t) => (self.callbacks.on_transcription)(t),
            VendorEvent::Vad(v) => (self.callbacks.on_vad)(v),
            VendorEvent::Usage { prompt, response } => {
                let mut usage = self.usage.lock().await;
                usage.prompt += prompt;
                usage.response += response;
                (self.callbacks.on_usage)(usage.prompt, usage.response);
            }
            VendorEvent::GoAway(reason) => (self.callbacks.on_go_away)(reason),
            VendorEvent::Error(err) => {
                debug!(error = %err, "realtime transport error");
                (self.callbacks.on_error)(err);
            }
            VendorEvent::Disconnected => {
                self.connected.store(false, Ordering::Release);
                (self.callbacks.on_disconnect)();
            }
        }
    }

    /// Cumulative usage for the life of the session.
    pub async fn usage_totals(&self) -> UsageTotals {
        *self.usage.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct NullTransport;

    #[async_trait::async_trait]
    impl RealtimeTransport for NullTransport {
        async fn send_audio(&self, _pcm: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn send_text(&self, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn send_tool_response(&self, _response: &ToolResponse) -> Result<()> {
            Ok(())
        }
    }

    fn noop_callbacks(audio_calls: Arc<AtomicUsize>) -> RealtimeCallbacks {
        RealtimeCallbacks {
            on_audio: Box::new(move |_wav| {
                audio_calls.fetch_add(1, Ordering::SeqCst);
            }),
            on_text: Box::new(|_| {}),
            on_tool_call: Box::new(|_| Box::pin(async { None })),
            on_transcription: Box::new(|_| {}),
            on_vad: Box::new(|_| {}),
            on_go_away: Box::new(|_| {}),
            on_session_update: Box::new(|_| {}),
            on_usage: Box::new(|_, _| {}),
            on_error: Box::new(|_| {}),
            on_disconnect: Box::new(|| {}),
        }
    }

    #[tokio::test]
    async fn turn_complete_emits_one_audio_callback_with_total_length() {
        let audio_calls = Arc::new(AtomicUsize::new(0));
        let session = RealtimeSession::connect(
            Arc::new(NullTransport),
            noop_callbacks(audio_calls.clone()),
            RealtimeConfig::default(),
        );

        session
            .dispatch_vendor_event(VendorEvent::AudioChunk(vec![0u8; 4]))
            .await;
        session
            .dispatch_vendor_event(VendorEvent::AudioChunk(vec![1u8; 3]))
            .await;
        session
            .dispatch_vendor_event(VendorEvent::AudioChunk(vec![2u8; 2]))
            .await;
        session
            .dispatch_vendor_event(VendorEvent::Turn(TurnSignal::TurnComplete))
            .await;

        assert_eq!(audio_calls.load(Ordering::SeqCst), 1);
        assert!(session.accumulator.lock().await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_marks_session_and_fires_callback() {
        let session = RealtimeSession::connect(
            Arc::new(NullTransport),
            noop_callbacks(Arc::new(AtomicUsize::new(0))),
            RealtimeConfig::default(),
        );
        assert!(session.is_connected());
        session.dispatch_vendor_event(VendorEvent::Disconnected).await;
        assert!(!session.is_connected());
        assert!(session.send_text("hi").await.is_err());
    }

    #[tokio::test]
    async fn usage_accumulates_across_turns() {
        let session = RealtimeSession::connect(
            Arc::new(NullTransport),
            noop_callbacks(Arc::new(AtomicUsize::new(0))),
            RealtimeConfig::default(),
        );
        session
            .dispatch_vendor_event(VendorEvent::Usage { prompt: 10, response: 5 })
            .await;
        session
            .dispatch_vendor_event(VendorEvent::Usage { prompt: 3, response: 7 })
            .await;
        let totals = session.usage_totals().await;
        assert_eq!(totals.prompt, 13);
        assert_eq!(totals.response, 12);
    }
}
