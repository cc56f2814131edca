use serde::{Deserialize, Serialize};

/// Requested interaction mode for a realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Audio,
    Text,
}

/// Parses a leading modality directive (`/live`, `/voice`, `/audio`, `/text`,
/// `/live-audio-file <path>`) off a message, consumed above this provider.
///
/// Returns the directive and the remainder of the message with the directive
/// and any immediately following whitespace stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalityDirective {
    Live,
    Voice,
    Audio,
    Text,
    LiveAudioFile(String),
}

pub fn parse_modality_directive(content: &str) -> Option<(ModalityDirective, &str)> {
    let trimmed = content.trim_start();
    let (directive, rest) = if let Some(rest) = trimmed.strip_prefix("/live-audio-file") {
        let path = rest.trim_start();
        return Some((ModalityDirective::LiveAudioFile(path.to_string()), ""));
    } else if let Some(rest) = trimmed.strip_prefix("/live") {
        (ModalityDirective::Live, rest)
    } else if let Some(rest) = trimmed.strip_prefix("/voice") {
        (ModalityDirective::Voice, rest)
    } else if let Some(rest) = trimmed.strip_prefix("/audio") {
        (ModalityDirective::Audio, rest)
    } else if let Some(rest) = trimmed.strip_prefix("/text") {
        (ModalityDirective::Text, rest)
    } else {
        return None;
    };
    Some((directive, rest.trim_start()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub modality: Modality,
    pub voice: Option<String>,
    pub vad_sensitivity: Option<f64>,
    pub vad_padding_ms: Option<u32>,
    pub activity_handling: Option<String>,
    pub tool_schemas: Vec<serde_json::Value>,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub context_compression: bool,
    pub affective: bool,
    pub proactive: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            modality: Modality::Audio,
            voice: None,
            vad_sensitivity: None,
            vad_padding_ms: None,
            activity_handling: None,
            tool_schemas: Vec::new(),
            input_transcription: false,
            output_transcription: false,
            context_compression: false,
            affective: false,
            proactive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionType {
    Input,
    Output,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub kind: TranscriptionType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadEvent {
    pub active: bool,
    pub kind: String,
}

/// Cumulative token usage for the life of the session (see the accumulate
/// decision recorded alongside `RealtimeSession`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub prompt: u64,
    pub response: u64,
}

/// Signal driving turn assembly: when the vendor reports either of these,
/// the PCM accumulator is drained and wrapped as a WAV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    TurnComplete,
    GenerationComplete,
}
