//! Audio post-processing for lip-synced playback.
//!
//! Turns one synthesized clip into a deliverable payload: a humanizing
//! two-pass pitch jitter, a base64 PCM16 blob for transport, and a per-chunk
//! normalized RMS envelope the front end uses to drive mouth movement.

use base64::Engine;
use rand::{Rng, rngs::StdRng};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde::{Deserialize, Serialize};
use stagecast_core::output::{AvatarActions, DisplayText};

/// Chunks shorter than this are appended unshifted; the interpolator has
/// nothing useful to work with at that length.
const MIN_RESAMPLE_CHUNK: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio clip is empty or fully silent")]
    EmptyAudio,
    #[error("pitch resampling failed: {0}")]
    Resample(String),
}

/// A synthesized clip decoded to the pipeline's uniform representation:
/// mono f32 samples in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Decodes PCM16 little-endian bytes. Trailing odd bytes are dropped.
    pub fn from_pcm16(pcm16: &[u8], sample_rate: u32) -> Self {
        let samples = pcm16
            .chunks_exact(2)
            .map(|chunk| {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                (v as f32 / 32768.0).clamp(-1.0, 1.0)
            })
            .collect();
        Self {
            samples,
            sample_rate,
        }
    }
}

/// One randomized micro-pitch pass: every `chunk_ms` of audio is resampled by
/// a playback-rate factor drawn uniformly from `[1-variation, 1+variation]`.
#[derive(Debug, Clone, Copy)]
pub struct PitchPass {
    pub chunk_ms: u32,
    pub variation: f32,
}

/// The full humanization profile applied before volume analysis.
#[derive(Debug, Clone)]
pub struct PitchProfile {
    pub passes: Vec<PitchPass>,
}

impl Default for PitchProfile {
    /// A fine-grained pass followed by a coarser one, tuned by ear.
    fn default() -> Self {
        Self {
            passes: vec![
                PitchPass {
                    chunk_ms: 5,
                    variation: 0.05,
                },
                PitchPass {
                    chunk_ms: 100,
                    variation: 0.07,
                },
            ],
        }
    }
}

impl PitchProfile {
    /// No jitter at all; output samples equal input samples.
    pub fn disabled() -> Self {
        Self { passes: Vec::new() }
    }
}

/// The ready-to-send package for one utterance: audio, lip-sync volumes, and
/// display data. `audio: None` marks a silent, text-only bubble.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AudioPayload {
    pub audio: Option<String>,
    pub volumes: Vec<f32>,
    pub slice_length: u32,
    pub display_text: DisplayText,
    pub actions: Option<AvatarActions>,
    pub forwarded: bool,
}

impl AudioPayload {
    /// The envelope for an utterance with nothing to play.
    pub fn silent(
        slice_length: u32,
        display_text: DisplayText,
        actions: Option<AvatarActions>,
        forwarded: bool,
    ) -> Self {
        Self {
            audio: None,
            volumes: Vec::new(),
            slice_length,
            display_text,
            actions,
            forwarded,
        }
    }
}

/// Builds the deliverable payload for one utterance.
///
/// Processing order matters: the pitch jitter runs before volume analysis so
/// the returned envelope matches what is actually played. A `None` clip skips
/// all processing and yields the silent payload. A fully silent clip fails
/// with [`AudioError::EmptyAudio`]; callers treat that as a recoverable
/// per-utterance error.
pub fn prepare_audio_payload(
    clip: Option<AudioClip>,
    slice_length_ms: u32,
    display_text: DisplayText,
    actions: Option<AvatarActions>,
    forwarded: bool,
    profile: &PitchProfile,
    rng: &mut StdRng,
) -> Result<AudioPayload, AudioError> {
    let Some(clip) = clip else {
        return Ok(AudioPayload::silent(
            slice_length_ms,
            display_text,
            actions,
            forwarded,
        ));
    };

    let mut samples = clip.samples;
    for pass in &profile.passes {
        samples = apply_pitch_jitter(&samples, clip.sample_rate, *pass, rng)?;
    }

    let volumes = volumes_by_chunk(&samples, clip.sample_rate, slice_length_ms)?;
    let audio = encode_pcm16_base64(&samples);

    Ok(AudioPayload {
        audio: Some(audio),
        volumes,
        slice_length: slice_length_ms,
        display_text,
        actions,
        forwarded,
    })
}

/// Applies one randomized pitch pass and concatenates the shifted chunks.
pub fn apply_pitch_jitter(
    samples: &[f32],
    sample_rate: u32,
    pass: PitchPass,
    rng: &mut StdRng,
) -> Result<Vec<f32>, AudioError> {
    if pass.variation <= 0.0 || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_len = ((sample_rate as u64 * pass.chunk_ms as u64) / 1000).max(1) as usize;
    samples
        .chunks(chunk_len)
        .try_fold(Vec::with_capacity(samples.len()), |mut out, chunk| {
            if chunk.len() < MIN_RESAMPLE_CHUNK {
                out.extend_from_slice(chunk);
                return Ok(out);
            }
            let factor = 1.0 + rng.random_range(-pass.variation..=pass.variation);
            // Playing back `factor` times faster and restoring the nominal
            // sample rate is a resample by 1/factor.
            let ratio = 1.0 / factor as f64;
            let mut resampler = FastFixedIn::<f32>::new(
                ratio,
                1.0 + pass.variation as f64 * 2.0,
                PolynomialDegree::Cubic,
                chunk.len(),
                1,
            )
            .map_err(|e| AudioError::Resample(e.to_string()))?;
            let shifted = resampler
                .process(&[chunk], None)
                .map_err(|e| AudioError::Resample(e.to_string()))?;
            out.extend_from_slice(&shifted[0]);
            Ok(out)
        })
}

/// Computes the normalized RMS envelope: one value per `slice_length_ms` of
/// audio, scaled so the loudest chunk maps to 1.0.
pub fn volumes_by_chunk(
    samples: &[f32],
    sample_rate: u32,
    slice_length_ms: u32,
) -> Result<Vec<f32>, AudioError> {
    let chunk_len = ((sample_rate as u64 * slice_length_ms as u64) / 1000).max(1) as usize;
    let rms: Vec<f32> = samples
        .chunks(chunk_len)
        .map(|chunk| {
            let energy: f32 = chunk.iter().map(|s| s * s).sum();
            (energy / chunk.len() as f32).sqrt()
        })
        .collect();

    let max = rms.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Err(AudioError::EmptyAudio);
    }
    Ok(rms.into_iter().map(|v| v / max).collect())
}

/// Encodes f32 samples as base64 PCM16 little-endian for text-safe transport.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    let pcm16: Vec<u8> = samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16)
}

/// Decodes a base64 PCM16 fragment back to f32 samples. Invalid base64 yields
/// an empty vector.
pub fn decode_pcm16_base64(fragment: &str) -> Vec<f32> {
    match base64::engine::general_purpose::STANDARD.decode(fragment) {
        Ok(bytes) => AudioClip::from_pcm16(&bytes, 0).samples,
        Err(_) => {
            tracing::error!("Failed to decode base64 audio fragment");
            Vec::new()
        }
    }
}
