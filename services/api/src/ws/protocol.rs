//! Defines the WebSocket message protocol between the viewer front end and
//! the server.

use crate::audio::AudioPayload;
use serde::{Deserialize, Serialize};

/// Messages sent from the viewer to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Free-form trigger: text the agent should respond to.
    TextInput { text: String },
    /// Direct command: speak this text verbatim, bypassing the agent.
    Speak { text: String },
    /// A recorded clip (base64 PCM16) to transcribe and respond to.
    MicAudio { audio: String },
    /// Barge-in: cancel the active turn.
    Interrupt,
}

/// Messages sent from the server to the viewer.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Announces the complete response text before any audio arrives, so the
    /// viewer can show it immediately while audio streams lag behind.
    FullText { text: String },
    /// Turn-start signal.
    SynthesisStart,
    /// One lip-sync-ready utterance envelope.
    Audio(AudioPayload),
    /// Turn-end signal. Emitted exactly once per turn, including cancelled
    /// ones, so the viewer's state machine is never left hanging.
    SynthesisComplete,
    /// A human-readable error. Per-utterance synthesis failures emit this
    /// without terminating the turn.
    Error { message: String },
}
