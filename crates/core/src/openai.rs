//! OpenAI-compatible engine implementations.
//!
//! These back the [`crate::engine`] traits with any OpenAI-compatible API
//! (chat completions for the agent, the speech endpoint for TTS, and the
//! transcription endpoint for ASR).

use crate::engine::{AgentEngine, AsrEngine, TtsAudio, TtsEngine};
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        AudioInput, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateSpeechRequestArgs, CreateTranscriptionRequestArgs,
        SpeechModel, SpeechResponseFormat, Voice,
    },
};
use async_trait::async_trait;
use tracing::debug;

/// The speech endpoint returns raw PCM at a fixed 24 kHz when asked for the
/// `pcm` response format.
const SPEECH_PCM_SAMPLE_RATE: u32 = 24_000;

/// Sample rate of clips handed to the transcription endpoint.
pub const ASR_SAMPLE_RATE: u32 = 16_000;

/// Maps a configured voice name onto the API's voice set, defaulting to Alloy
/// for anything unrecognized.
pub fn parse_voice(name: &str) -> Voice {
    match name.to_lowercase().as_str() {
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "nova" => Voice::Nova,
        "shimmer" => Voice::Shimmer,
        _ => Voice::Alloy,
    }
}

/// An [`AgentEngine`] backed by any OpenAI-compatible chat completions API.
///
/// The backend is stateless between calls, so the capability methods keep
/// their default no-op bodies: the caller's system prompt is passed on every
/// turn and there is no server-side memory to synchronize.
pub struct OpenAICompatibleAgent {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleAgent {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl AgentEngine for OpenAICompatibleAgent {
    async fn chat(
        &self,
        system_prompt: &str,
        _history_uid: &str,
        user_text: &str,
    ) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_text)
                    .build()?
                    .into(),
            ])
            .build()?;

        debug!(model = %self.model, chars = user_text.len(), "Requesting chat completion");
        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .context("Chat completion returned no choices")?;
        choice
            .message
            .content
            .ok_or_else(|| anyhow!("Chat completion had no text content"))
    }
}

/// A [`TtsEngine`] backed by the OpenAI speech endpoint.
pub struct OpenAISpeechTts {
    client: Client<OpenAIConfig>,
    model: String,
    voice: Voice,
}

impl OpenAISpeechTts {
    pub fn new(config: OpenAIConfig, model: String, voice: Voice) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            voice,
        }
    }
}

#[async_trait]
impl TtsEngine for OpenAISpeechTts {
    async fn synthesize(&self, text: &str) -> Result<TtsAudio> {
        let request = CreateSpeechRequestArgs::default()
            .model(SpeechModel::Other(self.model.clone()))
            .voice(self.voice.clone())
            .input(text)
            .response_format(SpeechResponseFormat::Pcm)
            .build()?;

        let response = self.client.audio().speech(request).await?;
        debug!(bytes = response.bytes.len(), "Synthesized utterance");
        Ok(TtsAudio {
            pcm16: response.bytes.to_vec(),
            sample_rate: SPEECH_PCM_SAMPLE_RATE,
        })
    }
}

/// An [`AsrEngine`] backed by the OpenAI transcription endpoint.
pub struct OpenAIWhisperAsr {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIWhisperAsr {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl AsrEngine for OpenAIWhisperAsr {
    async fn transcribe(&self, samples: Vec<f32>) -> Result<String> {
        let wav = wav_from_samples(&samples, ASR_SAMPLE_RATE);
        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8("clip.wav".to_string(), wav))
            .model(&self.model)
            .build()?;

        let response = self.client.audio().transcribe(request).await?;
        Ok(response.text)
    }
}

/// Wraps mono f32 samples in a minimal PCM16 WAV container, since the
/// transcription endpoint only accepts real audio file formats.
fn wav_from_samples(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * 2;
    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        wav.extend_from_slice(&v.to_le_bytes());
    }
    wav
}
