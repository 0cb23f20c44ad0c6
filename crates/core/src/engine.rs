//! Collaborator engine interfaces.
//!
//! The orchestration layer talks to its model backends exclusively through
//! these traits. Each call is long-running I/O and is awaited without blocking
//! other sessions; implementations must be shareable across session tasks.

use anyhow::Result;
use async_trait::async_trait;

/// One synthesized clip, as raw PCM16 little-endian mono samples.
///
/// The synthesis backend decides the sample rate; the audio pipeline treats
/// the clip as an opaque PCM-convertible blob.
#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub pcm16: Vec<u8>,
    pub sample_rate: u32,
}

/// A conversational agent that produces a response for one turn.
///
/// The capability methods have default no-op bodies: backends that cannot
/// update their system prompt or replay persisted memory simply inherit the
/// no-ops, and callers invoke them unconditionally.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Produces the full response text for one conversational turn.
    async fn chat(&self, system_prompt: &str, history_uid: &str, user_text: &str)
    -> Result<String>;

    /// Replaces the agent's system prompt, if the backend supports it.
    async fn apply_system_prompt(&self, _prompt: &str) -> Result<()> {
        Ok(())
    }

    /// Synchronizes the agent's working memory from persisted history, if the
    /// backend supports it.
    async fn sync_memory(&self, _history_uid: &str) -> Result<()> {
        Ok(())
    }
}

/// A text-to-speech backend.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Synthesizes one utterance. May be slow; the caller is responsible for
    /// not letting this block other sessions.
    async fn synthesize(&self, text: &str) -> Result<TtsAudio>;
}

/// A speech-to-text backend.
#[async_trait]
pub trait AsrEngine: Send + Sync {
    /// Transcribes mono f32 samples in `[-1, 1]` at 16 kHz.
    async fn transcribe(&self, samples: Vec<f32>) -> Result<String>;
}
