//! Wire protocol for the streaming transcription session.
//!
//! Audio travels to the service as raw PCM16 little-endian binary
//! messages, one frame per message. The service answers with JSON events
//! discriminated by a `type` field.

use serde::{Deserialize, Serialize};

/// Events received from the transcription service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Provisional hypothesis, superseded by later partials or a turn.
    PartialTranscript { text: String },
    /// A finalized turn. `turn_order` is assigned by the service and is
    /// monotonic within a session.
    TurnComplete {
        text: String,
        #[serde(default)]
        speaker: Option<String>,
        #[serde(default)]
        audio_start_ms: u64,
        #[serde(default)]
        audio_end_ms: u64,
        turn_order: u64,
    },
    /// Server-side session failure.
    SessionError { code: String, message: String },
}

/// Signals sent to the service as JSON text messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientSignal {
    /// Graceful end-of-stream before closing the transport.
    EndSession,
}

impl ClientSignal {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("client signal serializes")
    }
}

/// Parse a server text message. Callers log and drop failures; a bad
/// message never terminates the session.
pub fn parse_server_event(text: &str) -> Result<ServerEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// A finalized, speaker-attributed span of transcribed speech.
///
/// Immutable once appended to the session's turn list. `position` is
/// assigned locally on append and is strictly increasing and gap-free;
/// `order` is the service-assigned ordering key, used to deduplicate
/// across reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionTurn {
    pub position: u64,
    pub order: u64,
    pub speaker: Option<String>,
    pub text: String,
    pub audio_start_ms: u64,
    pub audio_end_ms: u64,
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
